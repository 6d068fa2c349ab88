pub mod config;
pub mod db;
pub mod model;
pub mod shares;
pub mod users;

pub use config::ConfigStore;
pub use db::Store;
pub use model::{Settings, Share, User, UserView};
pub use shares::ShareStore;
pub use users::UsersStore;
