pub mod alerts;
pub mod background;
pub mod board;
pub mod duplicates;
pub mod loader;
pub mod mutation;
pub mod view;
