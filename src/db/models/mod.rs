pub mod accident_models;

pub use accident_models::{
    Accident, CreateAccident, Location, NewAccident, Severity, Status, UpdateAccident,
};
