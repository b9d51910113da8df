pub mod bulk;
pub mod classes;
pub mod enrollment;

pub use bulk::BulkOrchestrator;
pub use classes::{ClassList, ClassListParams, ClassService, CreateClass};
pub use enrollment::{
    AvailableStudents, AvailableStudentsFilter, BulkEnrollStudents, EnrollStudent, EnrollmentService,
};
