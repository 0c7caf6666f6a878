pub mod bakery;
pub mod cli;
pub mod envcfg;

pub mod daemon {
    pub mod service;
}

pub mod fsops {
    pub mod io_atom;
    pub mod layout;
}

pub mod model {
    pub mod campaign;
    pub mod maillog;
    pub mod profile;
    pub mod result;
    pub mod template;
}

pub mod pipeline {
    pub mod mailer;
    pub mod message;
    pub mod sched;
}

pub mod store {
    pub mod campaign;
    pub mod maillog;
}

pub mod util {
    pub mod logging;
    pub mod time;
}

pub use envcfg::EnvConfig;
