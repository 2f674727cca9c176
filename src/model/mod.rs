pub mod alert;
pub mod config;
pub mod item;
pub mod lookup;
pub mod notice;
pub mod view_state;

pub use alert::*;
pub use config::*;
pub use item::*;
pub use lookup::*;
pub use notice::*;
pub use view_state::*;
