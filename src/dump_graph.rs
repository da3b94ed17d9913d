//! Computation graph dumper.
//!
//! Writes the graph of the current forward pass to a DOT file, by default
//! once (at the first invocation). Optionally renders the file with the
//! Graphviz `dot` binary; a missing binary only produces a warning.

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use crate::extension::{Extension, InvocationContext};
use crate::graph::ComputationGraph;
use crate::trigger::Trigger;
use crate::{Error, Result};

/// Extension that dumps the computation graph in DOT format.
#[derive(Debug)]
pub struct DumpGraph {
    filename: PathBuf,
    trigger: Trigger,
    render_format: Option<String>,
}

impl DumpGraph {
    /// Extension name used at registration.
    pub const NAME: &'static str = "dump_graph";

    /// Dump to `filename`, resolved against the output directory unless absolute.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the file name is empty.
    pub fn new(filename: impl Into<PathBuf>) -> Result<Self> {
        let filename = filename.into();
        if filename.as_os_str().is_empty() {
            return Err(Error::Config("graph file name is empty".to_string()));
        }
        Ok(Self {
            filename,
            trigger: Trigger::once(),
            render_format: None,
        })
    }

    /// Override the default `Once` trigger.
    #[must_use]
    pub fn with_trigger(mut self, trigger: Trigger) -> Self {
        self.trigger = trigger;
        self
    }

    /// After writing, run `dot -T<format>` to render an image next to the file.
    #[must_use]
    pub fn with_render(mut self, format: impl Into<String>) -> Self {
        self.render_format = Some(format.into());
        self
    }

    /// Configured file name.
    #[must_use]
    pub fn filename(&self) -> &Path {
        &self.filename
    }

    /// Path the file is written to for a given output directory.
    #[must_use]
    pub fn resolve(&self, out_dir: &Path) -> PathBuf {
        if self.filename.is_absolute() {
            self.filename.clone()
        } else {
            out_dir.join(&self.filename)
        }
    }

    /// Serialize `graph` and write it to `path`.
    ///
    /// Nothing is created on disk when serialization fails.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Serialization`] for an invalid graph and [`Error::Io`]
    /// if the file cannot be written.
    pub fn write(graph: &ComputationGraph, path: &Path) -> Result<()> {
        let dot = graph.to_dot()?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let mut writer = BufWriter::new(File::create(path)?);
        writer.write_all(dot.as_bytes())?;
        writer.flush()?;

        info!(
            path = %path.display(),
            nodes = graph.node_count(),
            edges = graph.edge_count(),
            "wrote computation graph"
        );
        Ok(())
    }

    fn render(path: &Path, format: &str) {
        let mut target = path.as_os_str().to_owned();
        target.push(".");
        target.push(format);

        let status = Command::new("dot")
            .arg(format!("-T{format}"))
            .arg(path)
            .arg("-o")
            .arg(&target)
            .status();

        match status {
            Ok(status) if status.success() => {
                debug!(path = %Path::new(&target).display(), "rendered graph");
            }
            Ok(status) => warn!(%status, path = %path.display(), "dot failed to render graph"),
            Err(err) => warn!(error = %err, "could not run dot; is graphviz installed?"),
        }
    }
}

impl Extension for DumpGraph {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn default_trigger(&self) -> Trigger {
        self.trigger.clone()
    }

    fn invoke(&mut self, ctx: &InvocationContext<'_>) -> Result<()> {
        let graph = ctx.graph().ok_or_else(|| {
            Error::Serialization("no computation graph in invocation context".to_string())
        })?;
        let path = self.resolve(ctx.out_dir());
        Self::write(graph, &path)?;

        if let Some(format) = &self.render_format {
            Self::render(&path, format);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trigger::TrainingProgress;

    fn graph() -> ComputationGraph {
        let mut g = ComputationGraph::new("net");
        g.add_variable("x", "x").add_function("relu", "ReLU").connect("x", "relu");
        g
    }

    #[test]
    fn test_resolve() {
        let dump = DumpGraph::new("graphs/cg.dot").unwrap();
        assert_eq!(dump.resolve(Path::new("result")), Path::new("result/graphs/cg.dot"));

        let tmp = tempfile::tempdir().unwrap();
        let abs = tmp.path().join("cg.dot");
        let dump = DumpGraph::new(&abs).unwrap();
        assert_eq!(dump.resolve(Path::new("result")), abs);
    }

    #[test]
    fn test_empty_name_rejected() {
        assert!(DumpGraph::new("").unwrap_err().is_config());
    }

    #[test]
    fn test_invoke_writes_and_parses_back() {
        let tmp = tempfile::tempdir().unwrap();
        let g = graph();
        let mut dump = DumpGraph::new("nested/cg.dot").unwrap();
        let ctx = InvocationContext::new(TrainingProgress::new(1, 0), tmp.path()).with_graph(&g);
        dump.invoke(&ctx).unwrap();

        let text = fs::read_to_string(tmp.path().join("nested/cg.dot")).unwrap();
        let parsed = ComputationGraph::from_dot(&text).unwrap();
        assert_eq!(parsed.node_count(), 2);
        assert_eq!(parsed.edge_count(), 1);
    }

    #[test]
    fn test_invalid_graph_leaves_no_file() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("cg.dot");
        let err = DumpGraph::write(&ComputationGraph::new("empty"), &path).unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
        assert!(!path.exists());
    }

    #[test]
    fn test_missing_graph_is_error() {
        let tmp = tempfile::tempdir().unwrap();
        let mut dump = DumpGraph::new("cg.dot").unwrap();
        let ctx = InvocationContext::new(TrainingProgress::new(1, 0), tmp.path());
        assert!(matches!(dump.invoke(&ctx), Err(Error::Serialization(_))));
    }

    #[test]
    fn test_unwritable_path_is_io() {
        let tmp = tempfile::tempdir().unwrap();
        let blocker = tmp.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let err = DumpGraph::write(&graph(), &blocker.join("cg.dot")).unwrap_err();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_render_failure_does_not_fail_invoke() {
        let tmp = tempfile::tempdir().unwrap();
        let g = graph();
        // An unknown output format makes dot fail even when it is installed.
        let mut dump = DumpGraph::new("cg.dot").unwrap().with_render("no-such-format");
        let ctx = InvocationContext::new(TrainingProgress::new(1, 0), tmp.path()).with_graph(&g);
        dump.invoke(&ctx).unwrap();
        assert!(tmp.path().join("cg.dot").exists());
    }
}
