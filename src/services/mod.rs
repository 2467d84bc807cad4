pub mod calibration;
pub mod completion;
pub mod resolver;
pub mod result_writer;

pub use calibration::{CalibratedElement, Calibrator};
pub use completion::{detector_for, CompletionDetector, Observation};
pub use resolver::{Resolver, Strategy, Unresolvable};
pub use result_writer::ResultWriter;
