pub mod callback_service;
pub mod object_service;
