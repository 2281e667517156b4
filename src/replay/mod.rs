pub mod body_replay;

pub use body_replay::BodyReplayBuffer;
