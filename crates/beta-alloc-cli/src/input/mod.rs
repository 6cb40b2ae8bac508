pub mod file;
pub mod prices_csv;
pub mod stdin;
