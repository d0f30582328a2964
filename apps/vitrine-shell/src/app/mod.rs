mod session;
mod startup;

pub(crate) use startup::run;
