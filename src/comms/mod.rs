pub mod user_api;
