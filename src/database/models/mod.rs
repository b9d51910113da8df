pub mod class;
pub mod enrollment;
pub mod student;
pub mod teacher;

pub use class::{ClassChanges, ClassEntity, ClassStatus, NewClass, RowChange};
pub use enrollment::{AtomicEnrollRequest, AtomicEnrollResult, EnrollFailure, EnrollmentRecord};
pub use student::{BoardingFilter, Gender, Student};
pub use teacher::TeacherProfile;
