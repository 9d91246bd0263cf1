//! Task graphs.
//!
//! A [`TaskGraph`] is an immutable, validated set of [`TaskSpec`]s. Edges are
//! never declared directly: a task depends on another exactly when one of its
//! inputs names one of the other task's outputs.
//!
//! [`GraphBuilder`] accepts tasks in authoring order. By default an input may
//! only reference outputs of tasks added before it, which makes cycles
//! impossible; [`GraphBuilder::allow_forward_references`] lifts that
//! restriction and defers resolution to [`GraphBuilder::build`], where cycles
//! are detected.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;

use thiserror::Error;

use super::param::ParamType;
use super::task::{InputSource, TaskSpec, TaskSpecBuilder, ValueType};
use super::template::TemplateError;
use super::types::{GraphId, TaskId};

/// Errors raised while constructing a graph.
#[derive(Debug, Error)]
pub enum GraphError {
    /// A slot, parameter, task or output does not exist in scope.
    #[error("task '{task}' references unresolved {reference}")]
    UnresolvedReference { task: TaskId, reference: String },

    /// An input's declared type disagrees with what it references.
    #[error("task '{task}' slot '{slot}' expects {expected} but {reference} is {actual}")]
    TypeMismatch {
        task: TaskId,
        slot: String,
        reference: String,
        expected: ValueType,
        actual: ValueType,
    },

    /// A task transitively depends on its own output.
    #[error("cyclic dependency involving task '{0}'")]
    CyclicDependency(TaskId),

    /// Two tasks share an id.
    #[error("duplicate task: {0}")]
    DuplicateTask(TaskId),

    /// A parameter was declared twice.
    #[error("duplicate parameter: {0}")]
    DuplicateParameter(String),

    /// The task spec is internally inconsistent.
    #[error("invalid task '{task}': {reason}")]
    InvalidTask { task: TaskId, reason: String },

    /// The task's command template does not parse.
    #[error("invalid command template in task '{task}': {source}")]
    InvalidTemplate {
        task: TaskId,
        #[source]
        source: TemplateError,
    },

    /// The graph contains no tasks.
    #[error("graph '{0}' has no tasks")]
    Empty(GraphId),
}

/// An immutable, validated task graph.
#[derive(Debug, Clone)]
pub struct TaskGraph {
    id: GraphId,
    params: BTreeMap<String, ParamType>,
    /// Tasks in definition order.
    tasks: Vec<Arc<TaskSpec>>,
    index: HashMap<TaskId, usize>,
    /// Edges: task_id -> tasks it depends on.
    dependencies: HashMap<TaskId, Vec<TaskId>>,
    order: Vec<TaskId>,
}

impl TaskGraph {
    /// Get the graph ID.
    pub fn id(&self) -> &GraphId {
        &self.id
    }

    /// Declared parameters and their types.
    pub fn params(&self) -> &BTreeMap<String, ParamType> {
        &self.params
    }

    /// Number of tasks.
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Check if the graph has no tasks.
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Get a task by id.
    pub fn task(&self, id: &TaskId) -> Option<&Arc<TaskSpec>> {
        self.index.get(id).map(|&i| &self.tasks[i])
    }

    /// Tasks in definition order.
    pub fn tasks(&self) -> impl Iterator<Item = &Arc<TaskSpec>> {
        self.tasks.iter()
    }

    /// Get the tasks a task depends on.
    pub fn dependencies(&self, id: &TaskId) -> &[TaskId] {
        self.dependencies
            .get(id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Get tasks that consume any output of the given task.
    pub fn downstream(&self, id: &TaskId) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| self.dependencies(&t.id).contains(id))
            .map(|t| t.id.clone())
            .collect()
    }

    /// One valid topological order, stable with respect to definition order.
    pub fn topological_order(&self) -> &[TaskId] {
        &self.order
    }

    /// Tasks not yet completed whose dependencies all are.
    pub fn ready_tasks(&self, completed: &HashSet<TaskId>) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| !completed.contains(&t.id))
            .filter(|t| self.dependencies(&t.id).iter().all(|d| completed.contains(d)))
            .map(|t| t.id.clone())
            .collect()
    }

    /// Resolve a named output to its position in the producer's outputs.
    pub fn output_index(&self, task: &TaskId, output: &str) -> Option<usize> {
        self.task(task)?.output_index(output)
    }
}

/// Builder for constructing graphs in authoring order.
pub struct GraphBuilder {
    id: GraphId,
    params: BTreeMap<String, ParamType>,
    tasks: Vec<TaskSpec>,
    index: HashMap<TaskId, usize>,
    deferred: bool,
    /// First error hit by a fluent call, reported by `build`.
    error: Option<GraphError>,
}

impl GraphBuilder {
    /// Create a new graph builder.
    pub fn new(id: impl Into<GraphId>) -> Self {
        Self {
            id: id.into(),
            params: BTreeMap::new(),
            tasks: Vec::new(),
            index: HashMap::new(),
            deferred: false,
            error: None,
        }
    }

    /// Allow inputs to reference tasks added later. References are then
    /// resolved, and cycles detected, in [`build`](Self::build).
    pub fn allow_forward_references(mut self) -> Self {
        self.deferred = true;
        self
    }

    /// Declare a parameter.
    pub fn add_param(&mut self, name: impl Into<String>, ty: ParamType) -> Result<(), GraphError> {
        let name = name.into();
        if self.params.contains_key(&name) {
            return Err(GraphError::DuplicateParameter(name));
        }
        self.params.insert(name, ty);
        Ok(())
    }

    /// Declare a parameter (fluent).
    pub fn param(mut self, name: impl Into<String>, ty: ParamType) -> Self {
        if let Err(e) = self.add_param(name, ty) {
            self.error.get_or_insert(e);
        }
        self
    }

    /// Add a task, validating its references against what is in scope.
    pub fn add_task(&mut self, spec: TaskSpec) -> Result<(), GraphError> {
        if self.index.contains_key(&spec.id) {
            return Err(GraphError::DuplicateTask(spec.id));
        }

        for slot in spec.action.template().slots() {
            if spec.input(slot).is_none() {
                return Err(GraphError::UnresolvedReference {
                    task: spec.id.clone(),
                    reference: format!("slot '{}'", slot),
                });
            }
        }

        for input in &spec.inputs {
            match &input.source {
                InputSource::Param(_) => self.check_input(&spec, input)?,
                InputSource::Output { task, .. } if *task == spec.id => {
                    if self.deferred {
                        return Err(GraphError::CyclicDependency(spec.id.clone()));
                    }
                    self.check_input(&spec, input)?;
                }
                InputSource::Output { .. } if self.deferred => {}
                InputSource::Output { .. } => self.check_input(&spec, input)?,
            }
        }

        self.index.insert(spec.id.clone(), self.tasks.len());
        self.tasks.push(spec);
        Ok(())
    }

    /// Build and add a task (fluent). Errors surface from `build`.
    pub fn task(mut self, spec: TaskSpecBuilder) -> Self {
        if self.error.is_some() {
            return self;
        }
        let result = spec.build().and_then(|spec| self.add_task(spec));
        if let Err(e) = result {
            self.error = Some(e);
        }
        self
    }

    /// Validate and freeze the graph.
    pub fn build(self) -> Result<TaskGraph, GraphError> {
        if let Some(e) = self.error {
            return Err(e);
        }
        if self.tasks.is_empty() {
            return Err(GraphError::Empty(self.id));
        }

        if self.deferred {
            for spec in &self.tasks {
                for input in &spec.inputs {
                    if let InputSource::Output { .. } = input.source {
                        self.check_input(spec, input)?;
                    }
                }
            }
        }

        let mut dependencies: HashMap<TaskId, Vec<TaskId>> = HashMap::new();
        for spec in &self.tasks {
            let mut deps: Vec<TaskId> = Vec::new();
            for input in &spec.inputs {
                if let InputSource::Output { task, .. } = &input.source
                    && !deps.contains(task)
                {
                    deps.push(task.clone());
                }
            }
            dependencies.insert(spec.id.clone(), deps);
        }

        let order = topological_sort(&self.tasks, &self.index, &dependencies)?;

        Ok(TaskGraph {
            id: self.id,
            params: self.params,
            tasks: self.tasks.into_iter().map(Arc::new).collect(),
            index: self.index,
            dependencies,
            order,
        })
    }

    fn check_input(
        &self,
        spec: &TaskSpec,
        input: &super::task::TaskInput,
    ) -> Result<(), GraphError> {
        let unresolved = || GraphError::UnresolvedReference {
            task: spec.id.clone(),
            reference: input.source.to_string(),
        };

        let actual: ValueType = match &input.source {
            InputSource::Param(name) => (*self.params.get(name).ok_or_else(unresolved)?).into(),
            InputSource::Output { task, output } => {
                let producer = self
                    .index
                    .get(task)
                    .map(|&i| &self.tasks[i])
                    .ok_or_else(unresolved)?;
                let declared = producer
                    .outputs
                    .iter()
                    .find(|o| &o.name == output)
                    .ok_or_else(unresolved)?;
                declared.kind.into()
            }
        };

        if actual != input.ty {
            return Err(GraphError::TypeMismatch {
                task: spec.id.clone(),
                slot: input.slot.clone(),
                reference: input.source.to_string(),
                expected: input.ty,
                actual,
            });
        }
        Ok(())
    }
}

/// Kahn's algorithm, seeded and expanded in definition order so the result
/// is deterministic.
fn topological_sort(
    tasks: &[TaskSpec],
    index: &HashMap<TaskId, usize>,
    dependencies: &HashMap<TaskId, Vec<TaskId>>,
) -> Result<Vec<TaskId>, GraphError> {
    let mut in_degree: Vec<usize> = vec![0; tasks.len()];
    let mut downstream: Vec<Vec<usize>> = vec![Vec::new(); tasks.len()];

    for (i, spec) in tasks.iter().enumerate() {
        let deps = dependencies.get(&spec.id).map(|d| d.as_slice()).unwrap_or(&[]);
        in_degree[i] = deps.len();
        for dep in deps {
            if let Some(&d) = index.get(dep) {
                downstream[d].push(i);
            }
        }
    }

    let mut queue: VecDeque<usize> = (0..tasks.len()).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(tasks.len());

    while let Some(i) = queue.pop_front() {
        order.push(tasks[i].id.clone());
        for &next in &downstream[i] {
            in_degree[next] -= 1;
            if in_degree[next] == 0 {
                queue.push_back(next);
            }
        }
    }

    if order.len() != tasks.len() {
        // Any task still holding in-degree sits on or behind a cycle.
        let stuck = (0..tasks.len())
            .find(|&i| in_degree[i] > 0)
            .map(|i| tasks[i].id.clone())
            .unwrap_or_else(|| tasks[0].id.clone());
        return Err(GraphError::CyclicDependency(stuck));
    }

    Ok(order)
}
