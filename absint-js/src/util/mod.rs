pub mod counter;
pub mod debug;
pub mod escape;
pub mod lines;
