//! The `plan` command: one position map per pod.

use anyhow::{Context, Result};
use checkpoint::{position_key, PositionMap, PositionRange};
use csv_feeder_dataset::base_name;
use csv_feeder_file::ByteRange;
use csv_feeder_partition::{plan_partitions, plan_record_partitions};
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(clap::Args, Clone, Debug)]
pub struct PlanArgs {
    /// Fixture file to split
    #[arg(long, value_name = "FILE")]
    pub file: PathBuf,

    /// Number of pods
    #[arg(long, default_value = "1")]
    pub pods: usize,

    /// Leave the first line out of every range
    #[arg(long)]
    pub skip_header: bool,

    /// Keep quoted fields that span lines inside one pod's range
    #[arg(long)]
    pub quoted: bool,

    /// Write `pod-<n>.json` files here instead of printing the maps
    #[arg(long, value_name = "DIR")]
    pub output_dir: Option<PathBuf>,
}

fn header_len(path: &Path) -> Result<u64> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let mut line = Vec::new();
    let n = BufReader::new(file)
        .read_until(b'\n', &mut line)
        .with_context(|| format!("Failed to read header of {}", path.display()))?;
    Ok(n as u64)
}

/// Position maps splitting `path` into `pods` line-aligned ranges, pod 1
/// first. With `quoted` the ranges are record-aligned instead.
pub fn plan_pods(
    path: &Path,
    pods: usize,
    skip_header: bool,
    quoted: bool,
) -> Result<Vec<PositionMap>> {
    let size = std::fs::metadata(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?
        .len();
    let start = if skip_header { header_len(path)? } else { 0 };
    let range = ByteRange::new(start, size);
    let ranges = if quoted {
        plan_record_partitions(path, range, pods.max(1))
    } else {
        plan_partitions(path, range, pods.max(1))
    }
    .with_context(|| format!("Failed to plan {}", path.display()))?;

    let name = base_name(&path.to_string_lossy()).to_string();
    Ok(ranges
        .into_iter()
        .map(|range| {
            let mut map = PositionMap::new();
            map.insert(
                position_key(&name, None),
                PositionRange {
                    start: range.start,
                    end: range.stop,
                },
            );
            map
        })
        .collect())
}

pub fn plan(args: &PlanArgs) -> Result<()> {
    let maps = plan_pods(&args.file, args.pods, args.skip_header, args.quoted)?;
    match &args.output_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create {}", dir.display()))?;
            for (index, map) in maps.iter().enumerate() {
                let path = dir.join(format!("pod-{}.json", index + 1));
                std::fs::write(&path, serde_json::to_string_pretty(map)?)
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                info!("Wrote {}", path.display());
            }
        }
        None => {
            for (index, map) in maps.iter().enumerate() {
                println!("{}\t{}", index + 1, serde_json::to_string(map)?);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_pods_cover_data_after_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("users.csv");
        let mut contents = String::from("id,name\n");
        for i in 0..100 {
            contents.push_str(&format!("{i},user{i}\n"));
        }
        std::fs::write(&path, &contents).unwrap();

        let maps = plan_pods(&path, 3, true, false).unwrap();
        assert_eq!(maps.len(), 3);
        let ranges: Vec<PositionRange> = maps.iter().map(|m| m["users.csv"]).collect();
        assert_eq!(ranges[0].start, 8);
        assert_eq!(ranges[2].end, contents.len() as u64);
        for pair in ranges.windows(2) {
            assert_eq!(pair[0].end, pair[1].start);
        }
        for range in &ranges {
            let at = range.start as usize;
            assert_eq!(&contents.as_bytes()[at - 1..at], b"\n");
        }
    }

    #[test]
    fn test_single_pod_without_skip_header() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, "A\n1\n").unwrap();
        let maps = plan_pods(&path, 1, false, false).unwrap();
        assert_eq!(maps[0]["a.csv"], PositionRange { start: 0, end: 4 });
    }

    #[test]
    fn test_quoted_pods_never_split_a_field() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("notes.csv");
        let mut contents = String::from("id,note\n");
        for i in 0..30 {
            contents.push_str(&format!("{i},\"top{i}\nbottom{i}\"\n"));
        }
        std::fs::write(&path, &contents).unwrap();

        for pods in 2..6 {
            let maps = plan_pods(&path, pods, true, true).unwrap();
            for map in &maps {
                let range = map["notes.csv"];
                let slice = &contents[range.start as usize..range.end as usize];
                assert_eq!(slice.matches('"').count() % 2, 0, "pods {pods}: {slice:?}");
                assert!(slice.is_empty() || slice.ends_with("\"\n"));
            }
        }
    }

    #[test]
    fn test_plan_writes_pod_files() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a.csv");
        std::fs::write(&path, "A\n1\n2\n3\n").unwrap();
        let output = dir.path().join("maps");
        plan(&PlanArgs {
            file: path,
            pods: 2,
            skip_header: true,
            quoted: false,
            output_dir: Some(output.clone()),
        })
        .unwrap();
        let pod2 = std::fs::read_to_string(output.join("pod-2.json")).unwrap();
        let map = checkpoint::parse_position_map(&pod2).unwrap();
        assert_eq!(map["a.csv"].end, 8);
    }
}
