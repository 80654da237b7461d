pub mod actor;
pub mod layout;
pub mod merger;
pub mod record;
pub mod session;
pub mod view;
pub mod window;
