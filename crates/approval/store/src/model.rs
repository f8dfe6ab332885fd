use approval_types::{
    ApprovalInstance, ApprovalInstanceId, HistoryAppend, PendingOutcome, StepExecution, Todo,
};

/// A write of one versioned record.
///
/// Inserted records get version 1; updates succeed only when the stored
/// version equals `expected_version`, and store `expected_version + 1`.
#[derive(Debug, Clone, PartialEq)]
pub enum Versioned<T> {
    Insert(T),
    Update { expected_version: u64, value: T },
}

impl<T> Versioned<T> {
    /// Update from a value read earlier, expecting its read version.
    pub fn update(value: T) -> Self
    where
        T: HasVersion,
    {
        Self::Update {
            expected_version: value.version(),
            value,
        }
    }

    pub fn value(&self) -> &T {
        match self {
            Self::Insert(value) => value,
            Self::Update { value, .. } => value,
        }
    }

    pub fn into_value(self) -> T {
        match self {
            Self::Insert(value) => value,
            Self::Update { value, .. } => value,
        }
    }

    /// Version the record will carry once the write is applied.
    pub fn next_version(&self) -> u64 {
        match self {
            Self::Insert(_) => 1,
            Self::Update {
                expected_version, ..
            } => expected_version + 1,
        }
    }
}

/// Records that carry an optimistic-concurrency version.
pub trait HasVersion {
    fn version(&self) -> u64;
}

impl HasVersion for ApprovalInstance {
    fn version(&self) -> u64 {
        self.version
    }
}

impl HasVersion for StepExecution {
    fn version(&self) -> u64 {
        self.version
    }
}

impl HasVersion for Todo {
    fn version(&self) -> u64 {
        self.version
    }
}

/// Everything one transition writes, applied atomically.
#[derive(Debug, Clone, Default)]
pub struct ChangeSet {
    pub instance: Option<Versioned<ApprovalInstance>>,
    pub executions: Vec<Versioned<StepExecution>>,
    pub todos: Vec<Versioned<Todo>>,
    pub history: Vec<HistoryAppend>,
    /// Terminal outcome to hand to the record store after commit.
    pub outcome: Option<PendingOutcome>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_instance(&mut self, instance: ApprovalInstance) -> &mut Self {
        self.instance = Some(Versioned::Insert(instance));
        self
    }

    pub fn update_instance(&mut self, instance: ApprovalInstance) -> &mut Self {
        self.instance = Some(Versioned::update(instance));
        self
    }

    pub fn insert_execution(&mut self, execution: StepExecution) -> &mut Self {
        self.executions.push(Versioned::Insert(execution));
        self
    }

    pub fn update_execution(&mut self, execution: StepExecution) -> &mut Self {
        self.executions.push(Versioned::update(execution));
        self
    }

    pub fn insert_todo(&mut self, todo: Todo) -> &mut Self {
        self.todos.push(Versioned::Insert(todo));
        self
    }

    pub fn update_todo(&mut self, todo: Todo) -> &mut Self {
        self.todos.push(Versioned::update(todo));
        self
    }

    pub fn append(&mut self, entry: HistoryAppend) -> &mut Self {
        self.history.push(entry);
        self
    }

    pub fn with_outcome(&mut self, outcome: PendingOutcome) -> &mut Self {
        self.outcome = Some(outcome);
        self
    }

    pub fn instance_id(&self) -> Option<&ApprovalInstanceId> {
        self.instance.as_ref().map(|v| &v.value().id)
    }
}
