pub mod dtype;
pub mod op;
pub mod value;
