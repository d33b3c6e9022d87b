pub mod accidents;

pub use accidents::{AccidentStore, AccidentsRepository, CountPredicate, ListFilter};
