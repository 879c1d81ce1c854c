mod nav;
mod playlist;
mod track;
mod user;

pub use crate::data::{
    nav::Nav,
    playlist::Playlist,
    track::Track,
    user::{Session, UserProfile},
};
