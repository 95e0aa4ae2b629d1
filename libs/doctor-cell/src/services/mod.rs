pub mod directory;
pub mod matching;

pub use directory::DoctorDirectory;
pub use matching::DoctorMatcher;
