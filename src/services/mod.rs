pub mod room_service;
pub mod scheduler_service;
pub mod websocket_service;
