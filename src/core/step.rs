// src/core/step.rs

//! Update steps: the units of work an [`crate::core::UpdateEngine`] runs, in
//! registration order, once a package has been verified.

use std::fmt;
use std::fs;
use std::path::Path;

use crate::core::package::{resolve_under, PackageDescriptor};
use crate::error::{OtaError, Result};

/// What a step gets to work with.
#[derive(Debug, Clone, Copy)]
pub struct StepContext<'a> {
    package: &'a PackageDescriptor,
    package_dir: &'a Path,
    target_dir: &'a Path,
}

impl<'a> StepContext<'a> {
    /// Builds a context. The engine does this; it is public for step tests.
    pub fn new(package: &'a PackageDescriptor, package_dir: &'a Path, target_dir: &'a Path) -> Self {
        Self {
            package,
            package_dir,
            target_dir,
        }
    }

    /// The verified package.
    pub fn package(&self) -> &'a PackageDescriptor {
        self.package
    }

    /// Directory the package files were verified in.
    pub fn package_dir(&self) -> &'a Path {
        self.package_dir
    }

    /// Directory being updated.
    pub fn target_dir(&self) -> &'a Path {
        self.target_dir
    }
}

/// A named unit of update work.
///
/// `Ok(true)` means the step succeeded, `Ok(false)` that it failed and
/// reported so, `Err` that it failed with an error. Both failure kinds make
/// the engine roll back; a panic is treated the same way.
pub trait UpdateStep {
    /// Name used in logs and failure reports.
    fn name(&self) -> &str;

    /// Applies the step.
    fn apply(&self, ctx: &StepContext<'_>) -> Result<bool>;
}

impl fmt::Debug for dyn UpdateStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateStep").field("name", &self.name()).finish()
    }
}

/// Adapts a closure into an [`UpdateStep`].
pub struct FnStep<F> {
    name: String,
    f: F,
}

impl<F> FnStep<F>
where
    F: Fn(&StepContext<'_>) -> Result<bool>,
{
    /// Wraps `f` under `name`.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> UpdateStep for FnStep<F>
where
    F: Fn(&StepContext<'_>) -> Result<bool>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn apply(&self, ctx: &StepContext<'_>) -> Result<bool> {
        (self.f)(ctx)
    }
}

/// Copies every package file into the target at the same relative path.
#[derive(Debug, Default, Clone, Copy)]
pub struct InstallFilesStep;

impl UpdateStep for InstallFilesStep {
    fn name(&self) -> &str {
        "install-files"
    }

    fn apply(&self, ctx: &StepContext<'_>) -> Result<bool> {
        for entry in ctx.package().files() {
            let source = entry.resolve(ctx.package_dir())?;
            let destination = resolve_under(ctx.target_dir(), &entry.path)?;
            if let Some(parent) = destination.parent() {
                fs::create_dir_all(parent).map_err(|e| OtaError::file_io(parent, e))?;
            }
            fs::copy(&source, &destination).map_err(|e| OtaError::file_io(&source, e))?;
            log::debug!("Installed {} -> {}", source.display(), destination.display());
        }
        Ok(true)
    }
}
