pub mod attendance;
pub mod classes;
pub mod core;
pub mod courses;
pub mod departments;
pub mod exams;
pub mod faculties;
pub mod fees;
pub mod reports;
pub mod students;
pub mod users;
pub mod years;
