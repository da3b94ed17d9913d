//! Model introspection: the capability a host exposes so extensions can read
//! its parameters.
//!
//! Hosts with their own tensor types implement [`Model`] as an adapter that
//! borrows their buffers. [`ParameterTree`] is an owned implementation for
//! hosts without one (and for tests).
//!
//! ## Traversal order
//!
//! [`Model::parameters`] must return parameters in a stable order: the
//! statistics collector relies on it to emit the same tag sequence on every
//! invocation. `ParameterTree` walks depth-first, own parameters before
//! children, both in insertion order.

use crate::{Error, Result};

/// Borrowed view of one named parameter.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterView<'a> {
    name: String,
    shape: &'a [usize],
    data: &'a [f32],
    grad: Option<&'a [f32]>,
}

impl<'a> ParameterView<'a> {
    /// Create a view over a parameter's value and optional gradient.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        shape: &'a [usize],
        data: &'a [f32],
        grad: Option<&'a [f32]>,
    ) -> Self {
        Self {
            name: name.into(),
            shape,
            data,
            grad,
        }
    }

    /// Qualified parameter name (e.g. `encoder/l1/W`).
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tensor shape.
    #[must_use]
    pub const fn shape(&self) -> &'a [usize] {
        self.shape
    }

    /// Flattened parameter values.
    #[must_use]
    pub const fn data(&self) -> &'a [f32] {
        self.data
    }

    /// Flattened gradient, absent before the first backward pass.
    #[must_use]
    pub const fn grad(&self) -> Option<&'a [f32]> {
        self.grad
    }

    /// Check that a present gradient matches the value array.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the lengths differ.
    pub fn validate(&self) -> Result<()> {
        match self.grad {
            Some(grad) if grad.len() != self.data.len() => Err(Error::Config(format!(
                "parameter '{}' has {} values but a gradient of {} elements",
                self.name,
                self.data.len(),
                grad.len()
            ))),
            _ => Ok(()),
        }
    }
}

/// Enumerable, named parameter tree.
pub trait Model {
    /// All parameters, in a deterministic order.
    fn parameters(&self) -> Vec<ParameterView<'_>>;

    /// Number of parameters (tensors, not elements).
    fn parameter_count(&self) -> usize {
        self.parameters().len()
    }
}

/// Owned parameter tensor.
#[derive(Debug, Clone, PartialEq)]
pub struct Parameter {
    name: String,
    shape: Vec<usize>,
    data: Vec<f32>,
    grad: Option<Vec<f32>>,
}

impl Parameter {
    /// Create a parameter without a gradient.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the name is empty, contains `/`, or the
    /// shape does not cover `data`.
    pub fn new(name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let name = name.into();
        validate_segment(&name, "parameter")?;

        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(Error::Config(format!(
                "parameter '{name}' has shape {shape:?} ({expected} elements) but {} values",
                data.len()
            )));
        }

        Ok(Self {
            name,
            shape,
            data,
            grad: None,
        })
    }

    /// Create a one-dimensional parameter.
    ///
    /// # Errors
    ///
    /// See [`Parameter::new`].
    pub fn from_vec(name: impl Into<String>, data: Vec<f32>) -> Result<Self> {
        let shape = vec![data.len()];
        Self::new(name, shape, data)
    }

    /// Attach a gradient.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the gradient length differs from the value length.
    pub fn with_grad(mut self, grad: Vec<f32>) -> Result<Self> {
        self.set_grad(grad)?;
        Ok(self)
    }

    /// Replace the gradient.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the gradient length differs from the value length.
    pub fn set_grad(&mut self, grad: Vec<f32>) -> Result<()> {
        if grad.len() != self.data.len() {
            return Err(Error::Config(format!(
                "gradient for '{}' has {} elements, expected {}",
                self.name,
                grad.len(),
                self.data.len()
            )));
        }
        self.grad = Some(grad);
        Ok(())
    }

    /// Drop the gradient (e.g. after `zero_grad` with `set_to_none`).
    pub fn clear_grad(&mut self) {
        self.grad = None;
    }

    /// Local name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tensor shape.
    #[must_use]
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Values.
    #[must_use]
    pub fn data(&self) -> &[f32] {
        &self.data
    }

    /// Mutable values, for hosts that update in place.
    pub fn data_mut(&mut self) -> &mut [f32] {
        &mut self.data
    }

    /// Gradient, if computed.
    #[must_use]
    pub fn grad(&self) -> Option<&[f32]> {
        self.grad.as_deref()
    }

    fn view(&self, qualified: String) -> ParameterView<'_> {
        ParameterView::new(qualified, &self.shape, &self.data, self.grad.as_deref())
    }
}

impl Model for [Parameter] {
    fn parameters(&self) -> Vec<ParameterView<'_>> {
        self.iter().map(|p| p.view(p.name.clone())).collect()
    }

    fn parameter_count(&self) -> usize {
        self.len()
    }
}

impl Model for Vec<Parameter> {
    fn parameters(&self) -> Vec<ParameterView<'_>> {
        self.as_slice().parameters()
    }

    fn parameter_count(&self) -> usize {
        self.len()
    }
}

/// Hierarchical group of parameters.
///
/// # Example
///
/// ```rust
/// use trueno_monitor::model::{Model, Parameter, ParameterTree};
///
/// # fn main() -> trueno_monitor::Result<()> {
/// let mut l1 = ParameterTree::new("l1");
/// l1.add_parameter(Parameter::new("W", vec![2, 2], vec![0.1, 0.2, 0.3, 0.4])?)?;
/// l1.add_parameter(Parameter::from_vec("b", vec![0.0, 0.0])?)?;
///
/// let mut model = ParameterTree::new("");
/// model.add_child(l1)?;
///
/// let names: Vec<String> = model.parameters().iter().map(|p| p.name().to_string()).collect();
/// assert_eq!(names, ["l1/W", "l1/b"]);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParameterTree {
    name: String,
    parameters: Vec<Parameter>,
    children: Vec<ParameterTree>,
}

impl ParameterTree {
    /// Create an empty group. An empty name leaves the group out of
    /// qualified names (typical for the root).
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parameters: Vec::new(),
            children: Vec::new(),
        }
    }

    /// Group name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Add a parameter to this group.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the group already has an entry with this name.
    pub fn add_parameter(&mut self, parameter: Parameter) -> Result<&mut Self> {
        self.check_free(parameter.name())?;
        self.parameters.push(parameter);
        Ok(self)
    }

    /// Add a child group.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the child is unnamed or the name is taken.
    pub fn add_child(&mut self, child: Self) -> Result<&mut Self> {
        validate_segment(&child.name, "child group")?;
        self.check_free(&child.name)?;
        self.children.push(child);
        Ok(self)
    }

    /// Look up a parameter by its path relative to this group (`l1/W`).
    #[must_use]
    pub fn parameter(&self, path: &str) -> Option<&Parameter> {
        match path.split_once('/') {
            Some((child, rest)) => self.child(child)?.parameter(rest),
            None => self.parameters.iter().find(|p| p.name == path),
        }
    }

    /// Mutable lookup, used by hosts to write gradients back.
    pub fn parameter_mut(&mut self, path: &str) -> Option<&mut Parameter> {
        match path.split_once('/') {
            Some((child, rest)) => self
                .children
                .iter_mut()
                .find(|c| c.name == child)?
                .parameter_mut(rest),
            None => self.parameters.iter_mut().find(|p| p.name == path),
        }
    }

    /// Direct child group by name.
    #[must_use]
    pub fn child(&self, name: &str) -> Option<&Self> {
        self.children.iter().find(|c| c.name == name)
    }

    fn check_free(&self, name: &str) -> Result<()> {
        let taken = self.parameters.iter().any(|p| p.name == name)
            || self.children.iter().any(|c| c.name == name);
        if taken {
            return Err(Error::Config(format!(
                "'{name}' already exists in group '{}'",
                self.name
            )));
        }
        Ok(())
    }

    fn collect<'a>(&'a self, prefix: &str, out: &mut Vec<ParameterView<'a>>) {
        let scope = join(prefix, &self.name);
        for parameter in &self.parameters {
            out.push(parameter.view(join(&scope, &parameter.name)));
        }
        for child in &self.children {
            child.collect(&scope, out);
        }
    }
}

impl Model for ParameterTree {
    fn parameters(&self) -> Vec<ParameterView<'_>> {
        let mut out = Vec::new();
        self.collect("", &mut out);
        out
    }

    fn parameter_count(&self) -> usize {
        self.parameters.len()
            + self
                .children
                .iter()
                .map(|child| child.parameter_count())
                .sum::<usize>()
    }
}

fn join(scope: &str, name: &str) -> String {
    match (scope.is_empty(), name.is_empty()) {
        (true, _) => name.to_string(),
        (false, true) => scope.to_string(),
        (false, false) => format!("{scope}/{name}"),
    }
}

fn validate_segment(name: &str, what: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Config(format!("{what} name must not be empty")));
    }
    if name.contains('/') {
        return Err(Error::Config(format!(
            "{what} name '{name}' must not contain '/'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree() -> ParameterTree {
        let mut l1 = ParameterTree::new("l1");
        l1.add_parameter(Parameter::from_vec("W", vec![1.0, 2.0]).unwrap())
            .unwrap();
        let mut l2 = ParameterTree::new("l2");
        l2.add_parameter(Parameter::from_vec("W", vec![3.0]).unwrap())
            .unwrap();

        let mut root = ParameterTree::new("");
        root.add_parameter(Parameter::from_vec("scale", vec![1.0]).unwrap())
            .unwrap();
        root.add_child(l1).unwrap();
        root.add_child(l2).unwrap();
        root
    }

    #[test]
    fn test_depth_first_order() {
        let root = tree();
        let names: Vec<_> = root.parameters().iter().map(|p| p.name().to_string()).collect();
        assert_eq!(names, ["scale", "l1/W", "l2/W"]);
        assert_eq!(root.parameter_count(), 3);
    }

    #[test]
    fn test_named_root_is_qualified() {
        let mut root = ParameterTree::new("predictor");
        root.add_parameter(Parameter::from_vec("b", vec![0.0]).unwrap())
            .unwrap();
        assert_eq!(root.parameters()[0].name(), "predictor/b");
    }

    #[test]
    fn test_shape_mismatch_rejected() {
        let err = Parameter::new("W", vec![2, 3], vec![0.0; 5]).unwrap_err();
        assert!(err.is_config());
    }

    #[test]
    fn test_grad_length_checked() {
        let p = Parameter::from_vec("W", vec![0.0; 3]).unwrap();
        assert!(p.with_grad(vec![0.0; 2]).is_err());
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let mut root = tree();
        let dup = Parameter::from_vec("scale", vec![0.0]).unwrap();
        assert!(root.add_parameter(dup).is_err());
        assert!(root.add_child(ParameterTree::new("l1")).is_err());
        assert!(root.add_child(ParameterTree::new("")).is_err());
    }

    #[test]
    fn test_lookup_and_grad_write_back() {
        let mut root = tree();
        root.parameter_mut("l1/W")
            .unwrap()
            .set_grad(vec![0.5, -0.5])
            .unwrap();
        assert_eq!(root.parameter("l1/W").unwrap().grad(), Some(&[0.5, -0.5][..]));
        assert!(root.parameter("l3/W").is_none());
    }

    #[test]
    fn test_view_validate() {
        let data = [1.0, 2.0];
        let grad = [1.0];
        let view = ParameterView::new("x", &[2], &data, Some(&grad[..]));
        assert!(view.validate().is_err());
    }
}
