use std::collections::BTreeSet;
use std::fs::{self, File, FileTimes, Metadata};
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, Local};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::scan::{Match, is_comment};

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";
const DATE_STAMP_FORMAT: &str = "%Y-%m-%d";

/// Second-resolution stamp used for backup and archive suffixes.
pub fn timestamp_suffix(now: DateTime<Local>) -> String {
    now.format(TIMESTAMP_FORMAT).to_string()
}

/// Date written into the deactivation marker.
pub fn date_stamp(now: DateTime<Local>) -> String {
    now.format(DATE_STAMP_FORMAT).to_string()
}

pub fn deactivation_marker(site: &str, stamp: &str) -> String {
    format!("# deactivated {site} {stamp} ")
}

/// Prefixes the targeted lines with the deactivation marker. Lines already
/// starting with `#` and every other line are copied through unchanged,
/// terminators included.
pub fn comment_out_lines(content: &str, target_lines: &BTreeSet<usize>, marker: &str) -> String {
    let mut out = String::with_capacity(content.len() + target_lines.len() * marker.len());
    for (index, line) in content.split_inclusive('\n').enumerate() {
        if target_lines.contains(&(index + 1)) && !is_comment(line) {
            out.push_str(marker);
        }
        out.push_str(line);
    }
    out
}

pub fn comment_matching_lines(
    path: &Path,
    matches: &[Match],
    site: &str,
    stamp: &str,
) -> Result<PathBuf> {
    comment_matching_lines_at(path, matches, site, stamp, Local::now())
}

/// Comments out `matches` in place after writing a backup copy.
///
/// Returns the backup path, or `path` itself when `matches` is empty, in which
/// case nothing is read or written.
pub fn comment_matching_lines_at(
    path: &Path,
    matches: &[Match],
    site: &str,
    stamp: &str,
    now: DateTime<Local>,
) -> Result<PathBuf> {
    if matches.is_empty() {
        return Ok(path.to_path_buf());
    }

    let target_lines: BTreeSet<usize> = matches.iter().map(|entry| entry.line_number).collect();
    // Taken before the read so the backup keeps the pre-run access time.
    let metadata =
        fs::metadata(path).with_context(|| format!("failed to inspect {}", path.display()))?;
    let original =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let updated = comment_out_lines(&original, &target_lines, &deactivation_marker(site, stamp));

    let backup_path = plan_backup_path(path, now);
    copy_with_metadata(path, &backup_path, &metadata)?;
    fs::write(path, updated).with_context(|| format!("failed to write {}", path.display()))?;
    info!(
        path = %path.display(),
        backup = %backup_path.display(),
        lines = target_lines.len(),
        "commented out matching lines"
    );
    Ok(backup_path)
}

/// `<path>.bak.<timestamp>`, with a numeric suffix if a backup from the same
/// second already exists.
pub fn plan_backup_path(path: &Path, now: DateTime<Local>) -> PathBuf {
    let base = format!("{}.bak.{}", path.display(), timestamp_suffix(now));
    let mut candidate = PathBuf::from(&base);
    let mut counter = 1usize;
    while candidate.exists() {
        candidate = PathBuf::from(format!("{base}.{counter}"));
        counter += 1;
    }
    candidate
}

fn copy_preserving_metadata(source: &Path, destination: &Path) -> Result<()> {
    let metadata = fs::metadata(source)
        .with_context(|| format!("failed to inspect {}", source.display()))?;
    copy_with_metadata(source, destination, &metadata)
}

/// Copies `source` and stamps `destination` with the times in `metadata`,
/// which the caller captured before touching the source.
fn copy_with_metadata(source: &Path, destination: &Path, metadata: &Metadata) -> Result<()> {
    // fs::copy carries permission bits; timestamps are restored separately.
    fs::copy(source, destination).with_context(|| {
        format!(
            "failed to copy {} to {}",
            source.display(),
            destination.display()
        )
    })?;
    let mut times = FileTimes::new();
    if let Ok(accessed) = metadata.accessed() {
        times = times.set_accessed(accessed);
    }
    if let Ok(modified) = metadata.modified() {
        times = times.set_modified(modified);
    }
    File::open(destination)
        .and_then(|file| file.set_times(times))
        .with_context(|| format!("failed to set timestamps on {}", destination.display()))?;
    Ok(())
}

pub fn choose_archive_target(archive_dir: &Path, site: &str) -> PathBuf {
    choose_archive_target_at(archive_dir, site, Local::now())
}

pub fn choose_archive_target_at(archive_dir: &Path, site: &str, now: DateTime<Local>) -> PathBuf {
    let base_target = archive_dir.join(site);
    if !base_target.exists() {
        return base_target;
    }
    let suffix = timestamp_suffix(now);
    let mut candidate = archive_dir.join(format!("{site}-{suffix}"));
    let mut counter = 2usize;
    while candidate.exists() {
        candidate = archive_dir.join(format!("{site}-{suffix}-{counter}"));
        counter += 1;
    }
    candidate
}

/// Moves the site directory to `target`, creating the archive parent first.
/// Never replaces an existing `target`.
pub fn move_site_dir(source: &Path, target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create archive dir {}", parent.display()))?;
    }
    if target.symlink_metadata().is_ok() {
        bail!("archive target already exists: {}", target.display());
    }

    match fs::rename(source, target) {
        Ok(()) => {
            info!(source = %source.display(), target = %target.display(), "moved site directory");
            Ok(())
        }
        Err(error) if error.kind() == io::ErrorKind::CrossesDevices => {
            debug!(
                source = %source.display(),
                target = %target.display(),
                "rename crosses devices; copying instead"
            );
            copy_tree(source, target).with_context(|| {
                format!(
                    "failed to move {}; copy fallback also failed",
                    source.display()
                )
            })?;
            fs::remove_dir_all(source).with_context(|| {
                format!(
                    "failed to remove source path {} after fallback copy",
                    source.display()
                )
            })?;
            info!(source = %source.display(), target = %target.display(), "copied site directory across devices");
            Ok(())
        }
        Err(error) => Err(error).with_context(|| {
            format!(
                "failed to move {} to {}",
                source.display(),
                target.display()
            )
        }),
    }
}

pub(crate) fn copy_tree(source: &Path, destination: &Path) -> Result<()> {
    let mut directory_permissions = Vec::new();
    for entry in WalkDir::new(source) {
        let entry = entry.with_context(|| {
            format!("failed to traverse {} while copying tree", source.display())
        })?;
        let relative = entry.path().strip_prefix(source).with_context(|| {
            format!(
                "failed to strip prefix {} from {}",
                source.display(),
                entry.path().display()
            )
        })?;
        let target_path = destination.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target_path).with_context(|| {
                format!(
                    "failed to create destination directory {}",
                    target_path.display()
                )
            })?;
            let permissions = entry
                .metadata()
                .with_context(|| format!("failed to inspect {}", entry.path().display()))?
                .permissions();
            directory_permissions.push((target_path, permissions));
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target_path)?;
        } else {
            copy_preserving_metadata(entry.path(), &target_path)?;
        }
    }
    // Deepest first, once contents are in place.
    for (path, permissions) in directory_permissions.into_iter().rev() {
        fs::set_permissions(&path, permissions)
            .with_context(|| format!("failed to set permissions on {}", path.display()))?;
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(source: &Path, destination: &Path) -> Result<()> {
    let link = fs::read_link(source)
        .with_context(|| format!("failed to read link {}", source.display()))?;
    std::os::unix::fs::symlink(&link, destination)
        .with_context(|| format!("failed to create link {}", destination.display()))
}

#[cfg(not(unix))]
fn copy_symlink(source: &Path, destination: &Path) -> Result<()> {
    copy_preserving_metadata(source, destination)
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::fs;
    use std::path::Path;

    use chrono::{DateTime, Local, TimeZone};
    use tempfile::tempdir;

    use super::{
        choose_archive_target, choose_archive_target_at, comment_matching_lines,
        comment_matching_lines_at, comment_out_lines, copy_tree, date_stamp, move_site_dir,
        plan_backup_path,
    };
    use crate::scan::analyze_config_file;

    fn fixed_now() -> DateTime<Local> {
        Local
            .with_ymd_and_hms(2026, 3, 14, 15, 9, 26)
            .single()
            .expect("unambiguous local time")
    }

    fn tokens() -> Vec<String> {
        vec!["mit".to_string()]
    }

    fn list_dir(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(dir)
            .expect("read dir")
            .map(|entry| {
                entry
                    .expect("entry")
                    .file_name()
                    .to_string_lossy()
                    .to_string()
            })
            .collect();
        names.sort();
        names
    }

    #[test]
    fn comment_out_lines_preserves_endings() {
        let content = "keep\r\nmit one\r\n  # mit two\nmit last";
        let targets = BTreeSet::from([2, 3, 4]);
        let updated = comment_out_lines(content, &targets, "# deactivated mit 2026-03-14 ");
        assert_eq!(
            updated,
            "keep\r\n# deactivated mit 2026-03-14 mit one\r\n  # mit two\n# deactivated mit 2026-03-14 mit last"
        );
    }

    #[test]
    fn comments_lines_and_writes_backup() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("crontab");
        let original = "SHELL=/bin/sh\n*/5 * * * * root /lu/sites/mit/cron.sh\n";
        fs::write(&path, original).expect("write");

        let analysis = analyze_config_file(&path, &tokens()).expect("analyze");
        let stamp = date_stamp(fixed_now());
        let backup = comment_matching_lines_at(
            &path,
            &analysis.active_matches,
            "mit",
            &stamp,
            fixed_now(),
        )
        .expect("comment");

        assert_eq!(backup, temp.path().join("crontab.bak.20260314150926"));
        assert_eq!(fs::read_to_string(&backup).expect("backup"), original);
        assert_eq!(
            fs::read_to_string(&path).expect("updated"),
            "SHELL=/bin/sh\n# deactivated mit 2026-03-14 */5 * * * * root /lu/sites/mit/cron.sh\n"
        );
    }

    #[test]
    fn backup_keeps_modification_time() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("vhosts.conf");
        fs::write(&path, "ServerName mit.example.org\n").expect("write");
        let before = fs::metadata(&path).expect("meta").modified().expect("mtime");

        let analysis = analyze_config_file(&path, &tokens()).expect("analyze");
        let backup =
            comment_matching_lines_at(&path, &analysis.active_matches, "mit", "2026-03-14", fixed_now())
                .expect("comment");
        let backup_mtime = fs::metadata(&backup).expect("meta").modified().expect("mtime");
        assert_eq!(backup_mtime, before);
    }

    #[cfg(unix)]
    #[test]
    fn backup_keeps_mode_and_access_time() {
        use std::fs::{File, FileTimes};
        use std::os::unix::fs::PermissionsExt;
        use std::time::{Duration, SystemTime};

        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("update-exim4.conf.conf");
        fs::write(&path, "dc_other_hostnames='mit.learningu.org'\n").expect("write");
        let analysis = analyze_config_file(&path, &tokens()).expect("analyze");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o640)).expect("chmod");
        // Old enough that a relatime read of the source would bump its atime.
        let accessed = SystemTime::UNIX_EPOCH + Duration::from_secs(1_700_000_000);
        let modified = SystemTime::UNIX_EPOCH + Duration::from_secs(1_600_000_000);
        File::open(&path)
            .and_then(|file| {
                file.set_times(
                    FileTimes::new()
                        .set_accessed(accessed)
                        .set_modified(modified),
                )
            })
            .expect("set times");

        let backup =
            comment_matching_lines_at(&path, &analysis.active_matches, "mit", "2026-03-14", fixed_now())
                .expect("comment");

        let metadata = fs::metadata(&backup).expect("meta");
        assert_eq!(metadata.permissions().mode() & 0o777, 0o640);
        assert_eq!(metadata.modified().expect("mtime"), modified);
        assert_eq!(metadata.accessed().expect("atime"), accessed);
    }

    #[test]
    fn wall_clock_entry_points_pick_fresh_paths() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("crontab");
        fs::write(&path, "0 * * * * root /lu/sites/mit/cron.sh\n").expect("write");

        let analysis = analyze_config_file(&path, &tokens()).expect("analyze");
        let backup = comment_matching_lines(&path, &analysis.active_matches, "mit", "2026-03-14")
            .expect("comment");
        let backup_name = backup
            .file_name()
            .expect("file name")
            .to_string_lossy()
            .to_string();
        assert!(backup_name.starts_with("crontab.bak."));
        assert_eq!(
            fs::read_to_string(&backup).expect("backup"),
            "0 * * * * root /lu/sites/mit/cron.sh\n"
        );

        let archive = temp.path().join("archive");
        assert_eq!(choose_archive_target(&archive, "mit"), archive.join("mit"));
        fs::create_dir_all(archive.join("mit")).expect("occupy");
        let fallback = choose_archive_target(&archive, "mit");
        assert!(!fallback.exists());
        assert!(
            fallback
                .file_name()
                .expect("file name")
                .to_string_lossy()
                .starts_with("mit-")
        );
    }

    #[test]
    fn no_matches_leaves_file_untouched() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("exim.conf");
        fs::write(&path, "dc_other_hostnames='stanford'\r\n").expect("write");

        let returned =
            comment_matching_lines_at(&path, &[], "mit", "2026-03-14", fixed_now()).expect("noop");

        assert_eq!(returned, path);
        assert_eq!(
            fs::read(&path).expect("read"),
            b"dc_other_hostnames='stanford'\r\n"
        );
        assert_eq!(list_dir(temp.path()), vec!["exim.conf"]);
    }

    #[test]
    fn second_pass_finds_nothing_active() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("vhosts.conf");
        fs::write(
            &path,
            "<VirtualHost *:80>\n  ServerName mit.example.org\n  DocumentRoot /lu/sites/mit\n</VirtualHost>\n",
        )
        .expect("write");

        let first = analyze_config_file(&path, &tokens()).expect("analyze");
        assert_eq!(first.active_matches.len(), 2);
        comment_matching_lines_at(&path, &first.active_matches, "mit", "2026-03-14", fixed_now())
            .expect("comment");

        let second = analyze_config_file(&path, &tokens()).expect("analyze");
        assert!(second.active_matches.is_empty());
        assert_eq!(second.commented_matches.len(), 2);
    }

    #[test]
    fn backup_path_never_reuses_existing_file() {
        let temp = tempdir().expect("tempdir");
        let path = temp.path().join("crontab");
        fs::write(temp.path().join("crontab.bak.20260314150926"), "old").expect("write");

        let planned = plan_backup_path(&path, fixed_now());
        assert_eq!(planned, temp.path().join("crontab.bak.20260314150926.1"));
    }

    #[test]
    fn archive_target_prefers_plain_site_name() {
        let temp = tempdir().expect("tempdir");
        let target = choose_archive_target_at(temp.path(), "mit", fixed_now());
        assert_eq!(target, temp.path().join("mit"));
    }

    #[test]
    fn archive_target_adds_timestamp_on_collision() {
        let temp = tempdir().expect("tempdir");
        let first = choose_archive_target_at(temp.path(), "mit", fixed_now());
        fs::create_dir_all(&first).expect("occupy");

        let second = choose_archive_target_at(temp.path(), "mit", fixed_now());
        assert_ne!(second, first);
        assert_eq!(second, temp.path().join("mit-20260314150926"));
        assert!(!second.exists());

        fs::create_dir_all(&second).expect("occupy");
        let third = choose_archive_target_at(temp.path(), "mit", fixed_now());
        assert_eq!(third, temp.path().join("mit-20260314150926-2"));
        assert!(!third.exists());
    }

    #[test]
    fn move_site_dir_creates_archive_and_moves() {
        let temp = tempdir().expect("tempdir");
        let source = temp.path().join("sites").join("mit");
        fs::create_dir_all(source.join("public")).expect("create site");
        fs::write(source.join("public").join("index.html"), "hi").expect("write");
        let target = temp.path().join("sites").join("archive").join("mit");

        move_site_dir(&source, &target).expect("move");

        assert!(!source.exists());
        assert_eq!(
            fs::read_to_string(target.join("public").join("index.html")).expect("read"),
            "hi"
        );
    }

    #[test]
    fn move_site_dir_refuses_existing_target() {
        let temp = tempdir().expect("tempdir");
        let source = temp.path().join("mit");
        let target = temp.path().join("archive").join("mit");
        fs::create_dir_all(&source).expect("create site");
        fs::create_dir_all(&target).expect("create target");

        let error = move_site_dir(&source, &target).expect_err("must fail");
        assert!(error.to_string().contains("already exists"));
        assert!(source.exists());
    }

    #[test]
    fn copy_tree_reproduces_nested_layout() {
        let temp = tempdir().expect("tempdir");
        let source = temp.path().join("src");
        fs::create_dir_all(source.join("a").join("b")).expect("create");
        fs::write(source.join("top.txt"), "top").expect("write");
        fs::write(source.join("a").join("b").join("deep.txt"), "deep").expect("write");
        #[cfg(unix)]
        std::os::unix::fs::symlink("top.txt", source.join("link")).expect("symlink");

        let destination = temp.path().join("dst");
        copy_tree(&source, &destination).expect("copy");

        assert_eq!(
            fs::read_to_string(destination.join("a").join("b").join("deep.txt")).expect("read"),
            "deep"
        );
        assert_eq!(
            fs::read_to_string(destination.join("top.txt")).expect("read"),
            "top"
        );
        #[cfg(unix)]
        assert_eq!(
            fs::read_link(destination.join("link")).expect("read link"),
            Path::new("top.txt")
        );
    }
}
