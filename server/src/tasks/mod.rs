pub mod crud;
pub mod notify;
