use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use drillscan_scan::{
    DrillScanner, NodeStatus, ReportSink, ScanJob, ScanNode, ScanReport, SinkError, WarningKind,
};
use parking_lot::Mutex;
use tempfile::TempDir;
use tokio::sync::broadcast::error::TryRecvError;

fn write_bytes(path: &Path, n: usize) {
    fs::write(path, vec![0u8; n]).unwrap();
}

fn job(root: &Path, threshold: u64, depth: u32, threads: usize) -> ScanJob {
    ScanJob::builder()
        .root(root)
        .threshold_bytes(threshold)
        .max_depth(depth)
        .threads(threads)
        .build()
        .unwrap()
}

fn child<'a>(node: &'a ScanNode, name: &str) -> &'a ScanNode {
    node.children
        .iter()
        .find(|c| c.name == name)
        .unwrap_or_else(|| panic!("no child {name} under {}", node.path.display()))
}

/// ```text
/// root/
///   big/      2000  (inner/ 1500, file 500)
///   small/     500  (inner/ 500)
///   huge/     3000  (inner/ 2000, file 1000)
/// ```
fn create_three_way_tree() -> TempDir {
    let temp = TempDir::new().unwrap();
    let root = temp.path();
    for dir in ["big/inner", "small/inner", "huge/inner"] {
        fs::create_dir_all(root.join(dir)).unwrap();
    }
    write_bytes(&root.join("big/inner/data"), 1500);
    write_bytes(&root.join("big/file"), 500);
    write_bytes(&root.join("small/inner/data"), 500);
    write_bytes(&root.join("huge/inner/data"), 2000);
    write_bytes(&root.join("huge/file"), 1000);
    temp
}

/// A wider tree: `width` top-level dirs, each with `width` subdirs holding
/// one 10-byte file.
fn create_wide_tree(width: usize) -> TempDir {
    let temp = TempDir::new().unwrap();
    for i in 0..width {
        for j in 0..width {
            let dir = temp.path().join(format!("d{i:02}/s{j:02}"));
            fs::create_dir_all(&dir).unwrap();
            write_bytes(&dir.join("f"), 10);
        }
    }
    temp
}

fn assert_no_double_counting(node: &ScanNode) {
    if node.status == NodeStatus::Drilled && !node.is_leaf() {
        assert_eq!(
            node.size_bytes,
            node.immediate_file_bytes + node.children_bytes(),
            "size mismatch at {}",
            node.path.display()
        );
    }
    for child in &node.children {
        assert_no_double_counting(child);
    }
}

#[test]
fn test_drills_only_nodes_above_threshold() {
    let temp = create_three_way_tree();
    let report = DrillScanner::new()
        .scan(&job(temp.path(), 1000, 2, 4))
        .unwrap();

    let root = &report.root;
    assert_eq!(root.size_bytes, 5500);
    assert!(root.expanded);
    assert_eq!(root.children.len(), 3);

    // Sorted by size descending.
    let names: Vec<_> = root.children.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(names, ["huge", "big", "small"]);

    let big = child(root, "big");
    assert_eq!(big.size_bytes, 2000);
    assert!(big.expanded);
    assert_eq!(big.children.len(), 1);

    let huge = child(root, "huge");
    assert_eq!(huge.size_bytes, 3000);
    assert!(huge.expanded);

    let small = child(root, "small");
    assert_eq!(small.size_bytes, 500);
    assert!(!small.expanded);
    assert!(small.children.is_empty());
    assert_eq!(small.status, NodeStatus::Drilled);

    // Depth 2 is the limit, so nodes there stay leaves.
    let inner = child(huge, "inner");
    assert_eq!(inner.depth, 2);
    assert!(!inner.expanded);
    assert!(inner.is_leaf());

    assert!(report.is_complete());
    assert_eq!(report.stats.expanded_nodes, 3);
    assert_no_double_counting(root);
}

#[test]
fn test_max_depth_one_keeps_large_child_a_leaf() {
    let temp = TempDir::new().unwrap();
    fs::create_dir_all(temp.path().join("large/deeper")).unwrap();
    write_bytes(&temp.path().join("large/deeper/blob"), 5000);

    let report = DrillScanner::new()
        .scan(&job(temp.path(), 1000, 1, 2))
        .unwrap();

    let large = child(&report.root, "large");
    assert_eq!(large.size_bytes, 5000);
    assert_eq!(large.status, NodeStatus::Drilled);
    assert!(!large.expanded);
    assert!(large.is_leaf());
}

#[cfg(unix)]
#[test]
fn test_denied_subdirectory_is_skipped_without_affecting_siblings() {
    use std::os::unix::fs::PermissionsExt;

    let temp = create_three_way_tree();
    let locked = temp.path().join("small");
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o000)).unwrap();

    // Privileged users can read the directory anyway.
    if fs::read_dir(&locked).is_ok() {
        fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
        eprintln!("skipping: directory permissions are not enforced for this user");
        return;
    }

    let report = DrillScanner::new().scan(&job(temp.path(), 0, 3, 2));
    fs::set_permissions(&locked, fs::Permissions::from_mode(0o755)).unwrap();
    let report = report.unwrap();

    let small = child(&report.root, "small");
    assert_eq!(small.status, NodeStatus::SkippedNoAccess);
    assert_eq!(small.size_bytes, 0);
    assert!(!small.measured);
    assert!(!small.complete);

    assert_eq!(child(&report.root, "big").size_bytes, 2000);
    assert!(child(&report.root, "big").complete);
    assert_eq!(child(&report.root, "huge").size_bytes, 3000);

    assert_eq!(report.root.size_bytes, 5000);
    assert!(!report.root.complete);
    assert!(!report.is_complete());
    assert!(
        report
            .warnings
            .iter()
            .any(|w| w.kind == WarningKind::PermissionDenied && w.path.ends_with("small"))
    );
    assert_eq!(report.stats.skipped_nodes, 1);
}

#[test]
fn test_worker_count_does_not_change_result() {
    let temp = create_wide_tree(6);
    let scanner = DrillScanner::new();

    let one = scanner.scan(&job(temp.path(), 0, 5, 1)).unwrap();
    let many = scanner.scan(&job(temp.path(), 0, 5, 4)).unwrap();

    assert_eq!(one.total_size(), 360);
    assert_eq!(one.root, many.root);
}

#[test]
fn test_rescanning_unchanged_tree_is_idempotent() {
    let temp = create_three_way_tree();
    let scanner = DrillScanner::new();
    let first = scanner.scan(&job(temp.path(), 1000, 3, 3)).unwrap();
    let second = scanner.scan(&job(temp.path(), 1000, 3, 3)).unwrap();
    assert_eq!(first.root, second.root);
    assert_eq!(first.stats, second.stats);
}

#[test]
fn test_higher_threshold_never_drills_more() {
    let temp = create_three_way_tree();
    let scanner = DrillScanner::new();
    let mut previous = usize::MAX;
    for threshold in [0, 500, 1000, 2500, 10_000] {
        let report = scanner.scan(&job(temp.path(), threshold, 3, 2)).unwrap();
        let expanded = report.root.iter().filter(|n| n.expanded).count();
        assert!(expanded <= previous, "threshold {threshold} drilled more");
        previous = expanded;
        assert_eq!(report.total_size(), 5500);
    }
}

#[test]
fn test_cancellation_leaves_no_unfinished_node() {
    let temp = create_wide_tree(12);
    let handle = DrillScanner::new()
        .start(&job(temp.path(), 0, 10, 2))
        .unwrap();
    handle.cancel();
    assert!(handle.is_cancelled());

    let report = handle.wait();

    assert!(report.cancelled);
    assert!(!report.is_complete());
    for node in report.root.iter() {
        assert!(
            node.status.is_terminal(),
            "{} left {:?}",
            node.path.display(),
            node.status
        );
    }
}

#[test]
fn test_cancel_mid_scan_keeps_sizes_consistent() {
    let temp = create_wide_tree(40);
    let handle = DrillScanner::new()
        .start(&job(temp.path(), 0, 10, 1))
        .unwrap();

    // Two finished nodes means the root is drilling with children queued.
    while handle.progress().nodes_scanned < 2 && !handle.is_done() {
        std::thread::yield_now();
    }
    handle.cancel();
    let report = handle.wait();

    assert!(report.cancelled);
    assert!(!report.is_complete());
    assert_eq!(report.root.status, NodeStatus::Drilled);
    assert_eq!(report.root.children.len(), 40);

    let mut cancelled = 0;
    for node in report.root.iter() {
        assert!(
            node.status.is_terminal(),
            "{} left {:?}",
            node.path.display(),
            node.status
        );
        if node.is_cancelled() {
            cancelled += 1;
            assert!(!node.complete);
            assert!(!node.expanded);
            if !node.measured {
                // Sized from the parent's probe.
                let expected = if node.depth == 1 { 400 } else { 10 };
                assert_eq!(node.size_bytes, expected, "{}", node.path.display());
            }
        }
    }
    assert!(cancelled > 0);
    assert!(report.root.iter().any(|n| n.is_cancelled() && !n.measured));
    assert_no_double_counting(&report.root);
    assert_eq!(report.total_size(), 16_000);
}

#[test]
fn test_invalid_requests_fail_before_scanning() {
    let temp = TempDir::new().unwrap();
    let file = temp.path().join("plain.txt");
    write_bytes(&file, 1);
    let scanner = DrillScanner::new();

    let missing = scanner.start(&ScanJob::new(temp.path().join("missing")));
    assert!(missing.is_err_and(|e| e.is_invalid_request()));

    let not_dir = scanner.start(&ScanJob::new(&file));
    assert!(not_dir.is_err_and(|e| e.is_invalid_request()));

    let mut too_deep = ScanJob::new(temp.path());
    too_deep.max_depth = 11;
    assert!(scanner.start(&too_deep).is_err_and(|e| e.is_invalid_request()));

    let mut too_shallow = ScanJob::new(temp.path());
    too_shallow.max_depth = 0;
    assert!(scanner.start(&too_shallow).is_err_and(|e| e.is_invalid_request()));
}

#[test]
fn test_excluded_paths_are_left_out() {
    let temp = create_three_way_tree();
    let job = ScanJob::builder()
        .root(temp.path())
        .threshold_bytes(0u64)
        .max_depth(3u32)
        .exclude_paths(vec![temp.path().canonicalize().unwrap().join("HUGE")])
        .build()
        .unwrap();

    let report = DrillScanner::new().scan(&job).unwrap();

    assert_eq!(report.total_size(), 2500);
    assert!(report.root.children.iter().all(|c| c.name != "huge"));
}

/// `path` spelled relative to the current directory.
#[cfg(unix)]
fn relative_to_cwd(path: &Path) -> PathBuf {
    let cwd = std::env::current_dir().unwrap();
    let mut relative = PathBuf::from(".");
    for _ in cwd.components().skip(1) {
        relative.push("..");
    }
    relative.join(path.strip_prefix("/").unwrap())
}

#[cfg(unix)]
#[test]
fn test_relative_exclude_matches_canonical_paths() {
    let temp = create_three_way_tree();
    let excluded = relative_to_cwd(&temp.path().join("huge"));
    assert!(excluded.is_relative());

    let job = ScanJob::builder()
        .root(temp.path())
        .threshold_bytes(0u64)
        .max_depth(3u32)
        .exclude_paths(vec![excluded])
        .build()
        .unwrap();
    let report = DrillScanner::new().scan(&job).unwrap();

    assert_eq!(report.total_size(), 2500);
    assert!(report.root.children.iter().all(|c| c.name != "huge"));
}

#[test]
fn test_subscriber_receives_final_snapshot() {
    let temp = create_three_way_tree();
    let scanner = DrillScanner::new();
    let mut rx = scanner.subscribe();

    let report = scanner.scan(&job(temp.path(), 1000, 2, 2)).unwrap();

    let mut last = None;
    loop {
        match rx.try_recv() {
            Ok(snapshot) => last = Some(snapshot),
            Err(TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
    let last = last.expect("no progress published");
    assert!(last.done);
    assert_eq!(last.pending_task_count, 0);
    assert_eq!(last.estimated_fraction(), 1.0);
    assert_eq!(last.nodes_scanned, report.stats.total_nodes);
    // Each byte is counted once across leaves and drilled nodes.
    assert_eq!(last.bytes_scanned, report.total_size());
}

#[test]
fn test_live_snapshot_and_progress() {
    let temp = create_wide_tree(4);
    let handle = DrillScanner::new()
        .start(&job(temp.path(), 0, 3, 2))
        .unwrap();

    let partial = handle.snapshot();
    assert_eq!(partial.path, temp.path().canonicalize().unwrap());

    let report = handle.wait();
    assert!(report.is_complete());
    assert_eq!(report.stats.total_nodes, 1 + 4 + 16);
    assert_eq!(report.total_size(), 160);
}

struct RecordingSink {
    seen: Arc<Mutex<Vec<(PathBuf, u64)>>>,
}

impl ReportSink for RecordingSink {
    fn name(&self) -> &str {
        "recording"
    }

    fn accept(&self, report: &ScanReport) -> Result<(), SinkError> {
        self.seen
            .lock()
            .push((report.root_path.clone(), report.total_size()));
        Ok(())
    }
}

struct FailingSink;

impl ReportSink for FailingSink {
    fn name(&self) -> &str {
        "failing"
    }

    fn accept(&self, _report: &ScanReport) -> Result<(), SinkError> {
        Err(SinkError::Other {
            message: "store unavailable".into(),
        })
    }
}

#[test]
fn test_report_is_handed_to_every_sink() {
    let temp = create_three_way_tree();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let scanner = DrillScanner::new()
        .with_sink(FailingSink)
        .with_sink(RecordingSink {
            seen: Arc::clone(&seen),
        });

    let report = scanner.scan(&job(temp.path(), 1000, 2, 2)).unwrap();

    let seen = seen.lock();
    assert_eq!(seen.len(), 1);
    assert_eq!(seen[0], (report.root_path.clone(), 5500));
}

#[test]
fn test_large_folders_from_real_scan() {
    let temp = create_three_way_tree();
    let report = DrillScanner::new()
        .scan(&job(temp.path(), 1000, 3, 2))
        .unwrap();

    let large = report.large_folders();
    let sizes: Vec<u64> = large.iter().map(|f| f.size_bytes).collect();
    assert_eq!(sizes, [5500, 3000, 2000, 2000, 1500]);

    let inner = large.iter().find(|f| f.size_bytes == 1500).unwrap();
    assert_eq!(inner.ancestors.len(), 2);
    assert_eq!(inner.ancestors[0].1, 2000);
}
