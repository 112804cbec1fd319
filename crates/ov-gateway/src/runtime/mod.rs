pub mod cancel;
pub mod roundabout;
pub mod seq;
