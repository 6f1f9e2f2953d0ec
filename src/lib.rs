pub mod camera;
pub mod corpus;
pub mod overlay;
pub mod placement;
pub mod projection;
pub mod sampling;
pub mod scene;
pub mod settings;

pub mod render;
pub mod server;

pub mod cli;
