mod annotations;
mod driver;
mod helper;
