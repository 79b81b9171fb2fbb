pub mod activity;
pub mod follow;
pub mod notification;
pub mod response;
pub mod user;
pub mod websocket;
