pub mod symbol;
pub mod time;
