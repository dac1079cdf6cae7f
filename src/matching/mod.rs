//! Candidate search and ranking: who should take a donation, and who should
//! carry it.

pub mod dispatch;
pub mod scoring;
pub mod urgency;

pub use dispatch::{DonationCandidate, Dispatcher, NgoCandidate, VolunteerCandidate};
pub use urgency::{classify, Urgency, UrgencyLevel};
