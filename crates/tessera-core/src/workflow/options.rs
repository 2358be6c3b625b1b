use serde::{Deserialize, Serialize};

use crate::engine::ActivityOptions;

/// Activity options per activity class, passed explicitly with every
/// invocation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowOptions {
    pub job_status: ActivityOptions,
    pub import: ActivityOptions,
    pub register: ActivityOptions,
    pub compensate: ActivityOptions,
    pub notify: ActivityOptions,
}

/// The activity classes, with the name used in configuration keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityClass {
    JobStatus,
    Import,
    Register,
    Compensate,
    Notify,
}

impl ActivityClass {
    pub const ALL: [ActivityClass; 5] = [
        ActivityClass::JobStatus,
        ActivityClass::Import,
        ActivityClass::Register,
        ActivityClass::Compensate,
        ActivityClass::Notify,
    ];

    pub fn env_name(self) -> &'static str {
        match self {
            ActivityClass::JobStatus => "JOB_STATUS",
            ActivityClass::Import => "IMPORT",
            ActivityClass::Register => "REGISTER",
            ActivityClass::Compensate => "COMPENSATE",
            ActivityClass::Notify => "NOTIFY",
        }
    }
}

impl WorkflowOptions {
    /// The same options for every class.
    pub fn uniform(options: ActivityOptions) -> Self {
        Self {
            job_status: options.clone(),
            import: options.clone(),
            register: options.clone(),
            compensate: options.clone(),
            notify: options,
        }
    }

    pub fn get(&self, class: ActivityClass) -> &ActivityOptions {
        match class {
            ActivityClass::JobStatus => &self.job_status,
            ActivityClass::Import => &self.import,
            ActivityClass::Register => &self.register,
            ActivityClass::Compensate => &self.compensate,
            ActivityClass::Notify => &self.notify,
        }
    }

    pub fn get_mut(&mut self, class: ActivityClass) -> &mut ActivityOptions {
        match class {
            ActivityClass::JobStatus => &mut self.job_status,
            ActivityClass::Import => &mut self.import,
            ActivityClass::Register => &mut self.register,
            ActivityClass::Compensate => &mut self.compensate,
            ActivityClass::Notify => &mut self.notify,
        }
    }
}
