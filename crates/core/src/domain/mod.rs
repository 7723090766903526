pub mod department;
pub mod identity;
pub mod request;
