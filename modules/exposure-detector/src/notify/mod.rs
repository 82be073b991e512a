pub mod fanout;
pub mod log;
