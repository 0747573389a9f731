pub mod calendar;
pub mod mail_search;
