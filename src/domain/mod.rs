pub mod donation;
pub mod geo;
pub mod notification;
pub mod user;

pub use donation::{
    DeliveryStatus, Donation, DonationStatus, FoodCategory, Lifecycle, NewDonation, Perishability,
    PickupWindow, Quantity, StorageReq,
};
pub use geo::GeoPoint;
pub use notification::{Notification, NotificationKind};
pub use user::{
    AccountStatus, NgoProfile, Profile, Role, User, UserStats, VehicleType, VolunteerProfile,
    VolunteerTier,
};
