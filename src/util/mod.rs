pub mod lenient;
pub mod unicode;
