pub mod prices;
pub mod returns;
