pub mod bet;
pub mod event;
pub mod game;
pub mod player;
pub mod room;
