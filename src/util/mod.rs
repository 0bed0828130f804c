pub mod elo;
pub mod errors;
pub mod jwt;
pub mod mentions;
pub mod query;
pub mod sql_enum;
pub mod validator;
