pub mod controller;
pub mod device_session;
pub mod dispatcher;
pub mod poller;
