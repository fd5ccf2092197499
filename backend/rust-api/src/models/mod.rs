pub mod lesson;
pub mod profile;
pub mod question;
pub mod sequence;
pub mod stage;
pub mod verification;
