pub mod campaigns;
pub mod waitlist_users;
