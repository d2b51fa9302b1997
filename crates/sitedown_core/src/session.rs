use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use tracing::debug;

use crate::deactivate::{
    choose_archive_target_at, comment_matching_lines_at, date_stamp, move_site_dir,
};
use crate::error::{BlockingError, Preconditions};
use crate::report::{render_analysis, render_blocking_errors, render_edit_preview};
use crate::runtime::ResolvedPaths;
use crate::scan::{FileAnalysis, analyze_config_file};
use crate::tokens::normalize_tokens;

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_BLOCKED: u8 = 2;

#[derive(Debug, Clone, Default)]
pub struct DeactivateRequest {
    pub site: String,
    pub extra_tokens: Vec<String>,
    pub apply: bool,
    pub allow_missing: bool,
    pub show_diff: bool,
}

#[derive(Debug, Clone)]
pub struct PlannedFile {
    pub label: String,
    pub path: PathBuf,
    /// `None` when the file does not exist.
    pub analysis: Option<FileAnalysis>,
}

#[derive(Debug, Clone)]
pub struct DeactivationPlan {
    pub site: String,
    pub tokens: Vec<String>,
    pub files: Vec<PlannedFile>,
    pub site_dir: PathBuf,
    pub archive_target: PathBuf,
    pub preconditions: Preconditions,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileUpdate {
    pub path: PathBuf,
    pub backup_path: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyReport {
    pub updates: Vec<FileUpdate>,
    pub moved_from: PathBuf,
    pub moved_to: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    DryRun,
    Applied(ApplyReport),
    Blocked(Vec<BlockingError>),
}

impl RunOutcome {
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::DryRun | Self::Applied(_) => EXIT_SUCCESS,
            Self::Blocked(_) => EXIT_BLOCKED,
        }
    }
}

/// Rejects site identifiers that are not a single directory name.
pub fn validate_site_name(site: &str) -> Result<()> {
    let trimmed = site.trim();
    if trimmed.is_empty() {
        bail!("site name must not be empty");
    }
    if trimmed != site {
        bail!("site name must not have surrounding whitespace: {site:?}");
    }
    if matches!(site, "." | "..") || site.contains('/') || site.contains('\\') {
        bail!("site name must be a single directory name: {site}");
    }
    Ok(())
}

pub fn run_deactivation<W: Write>(
    paths: &ResolvedPaths,
    request: &DeactivateRequest,
    out: &mut W,
) -> Result<RunOutcome> {
    run_deactivation_at(paths, request, out, Local::now())
}

pub fn run_deactivation_at<W: Write>(
    paths: &ResolvedPaths,
    request: &DeactivateRequest,
    out: &mut W,
    now: DateTime<Local>,
) -> Result<RunOutcome> {
    let mode = if request.apply { "APPLY" } else { "DRY RUN" };
    writeln!(out, "Mode: {mode}")?;

    let plan = plan_deactivation_at(paths, request, now)?;
    writeln!(out, "Matching tokens: {}", plan.tokens.join(", "))?;
    writeln!(out)?;

    let stamp = date_stamp(now);
    for file in &plan.files {
        let Some(analysis) = &file.analysis else {
            continue;
        };
        write!(out, "{}", render_analysis(&file.label, analysis))?;
        if request.show_diff {
            let preview = render_edit_preview(analysis, &plan.site, &stamp)?;
            if !preview.is_empty() {
                write!(out, "{preview}")?;
                writeln!(out)?;
            }
        }
    }

    writeln!(out, "Site directory: {}", plan.site_dir.display())?;
    writeln!(out, "Archive target: {}", plan.archive_target.display())?;
    writeln!(out)?;

    if plan.preconditions.is_blocked() {
        write!(out, "{}", render_blocking_errors(plan.preconditions.errors()))?;
        return Ok(RunOutcome::Blocked(plan.preconditions.into_errors()));
    }

    if !request.apply {
        writeln!(out, "Dry run complete. Re-run with --apply to make changes.")?;
        return Ok(RunOutcome::DryRun);
    }

    writeln!(out, "Applying changes...")?;
    let report = apply_plan(&plan, now, out)?;
    writeln!(out, "Done.")?;
    Ok(RunOutcome::Applied(report))
}

pub fn plan_deactivation_at(
    paths: &ResolvedPaths,
    request: &DeactivateRequest,
    now: DateTime<Local>,
) -> Result<DeactivationPlan> {
    validate_site_name(&request.site)?;
    let tokens = normalize_tokens(&request.site, &request.extra_tokens);
    debug!(site = %request.site, tokens = ?tokens, apply = request.apply, "planning deactivation");

    let mut preconditions = Preconditions::default();
    let mut files = Vec::with_capacity(paths.config_files.len());
    for entry in &paths.config_files {
        if !entry.path.exists() {
            preconditions.push(BlockingError::MissingConfigFile {
                path: entry.path.clone(),
            });
            files.push(PlannedFile {
                label: entry.label.clone(),
                path: entry.path.clone(),
                analysis: None,
            });
            continue;
        }
        let analysis = analyze_config_file(&entry.path, &tokens)?;
        if request.apply && !request.allow_missing && !analysis.has_active_matches() {
            preconditions.push(BlockingError::NoActiveMatches {
                path: entry.path.clone(),
            });
        }
        files.push(PlannedFile {
            label: entry.label.clone(),
            path: entry.path.clone(),
            analysis: Some(analysis),
        });
    }

    let site_dir = paths.site_dir(&request.site);
    let archive_target = choose_archive_target_at(&paths.archive_dir, &request.site, now);

    if !site_dir.is_dir() {
        preconditions.push(BlockingError::MissingSiteDirectory {
            path: site_dir.clone(),
        });
    } else {
        let site_real = resolve_existing_prefix(&site_dir)?;
        let archive_real = resolve_existing_prefix(&paths.archive_dir)?;
        if site_real.parent() == Some(archive_real.as_path()) {
            preconditions.push(BlockingError::AlreadyArchived {
                path: site_dir.clone(),
            });
        } else if archive_real.starts_with(&site_real) {
            preconditions.push(BlockingError::ArchiveInsideSite {
                site_dir: site_dir.clone(),
                archive_dir: paths.archive_dir.clone(),
            });
        }
    }

    Ok(DeactivationPlan {
        site: request.site.clone(),
        tokens,
        files,
        site_dir,
        archive_target,
        preconditions,
    })
}

/// Comments out every planned file, then moves the site directory. Fails
/// without touching anything if the plan is blocked.
pub fn apply_plan<W: Write>(
    plan: &DeactivationPlan,
    now: DateTime<Local>,
    out: &mut W,
) -> Result<ApplyReport> {
    if plan.preconditions.is_blocked() {
        bail!("refusing to apply a plan with blocking errors");
    }

    let stamp = date_stamp(now);
    let mut updates = Vec::with_capacity(plan.files.len());
    for file in &plan.files {
        let Some(analysis) = &file.analysis else {
            continue;
        };
        if analysis.has_active_matches() {
            let backup_path = comment_matching_lines_at(
                &file.path,
                &analysis.active_matches,
                &plan.site,
                &stamp,
                now,
            )?;
            writeln!(
                out,
                "  Updated {} (backup: {})",
                file.path.display(),
                backup_path.display()
            )?;
            updates.push(FileUpdate {
                path: file.path.clone(),
                backup_path: Some(backup_path),
            });
        } else {
            writeln!(out, "  No updates needed in {}", file.path.display())?;
            updates.push(FileUpdate {
                path: file.path.clone(),
                backup_path: None,
            });
        }
    }

    move_site_dir(&plan.site_dir, &plan.archive_target)?;
    writeln!(
        out,
        "  Moved {} -> {}",
        plan.site_dir.display(),
        plan.archive_target.display()
    )?;

    Ok(ApplyReport {
        updates,
        moved_from: plan.site_dir.clone(),
        moved_to: plan.archive_target.clone(),
    })
}

/// Canonicalizes the deepest existing ancestor of `path` and re-attaches the
/// remaining components, so an archive dir that does not exist yet still
/// compares by where it would be created.
fn resolve_existing_prefix(path: &Path) -> Result<PathBuf> {
    for ancestor in path.ancestors() {
        if ancestor.as_os_str().is_empty() {
            break;
        }
        match fs::canonicalize(ancestor) {
            Ok(real) => {
                let rest = path.strip_prefix(ancestor).with_context(|| {
                    format!(
                        "failed to strip prefix {} from {}",
                        ancestor.display(),
                        path.display()
                    )
                })?;
                if rest.as_os_str().is_empty() {
                    return Ok(real);
                }
                return Ok(real.join(rest));
            }
            Err(error) if error.kind() == io::ErrorKind::NotFound => continue,
            Err(error) => {
                return Err(error)
                    .with_context(|| format!("failed to resolve {}", ancestor.display()));
            }
        }
    }
    Ok(path.to_path_buf())
}
