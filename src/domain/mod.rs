pub mod email;
pub mod notification;
pub mod recipient;
