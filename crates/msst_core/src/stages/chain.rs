//! Stage chain construction.
//!
//! The chain is a fold over [`StageKind::ORDER`] carrying the current
//! directory: an enabled stage reads from it and then moves it to its own
//! output directory; a disabled stage leaves it alone.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::models::{ModelSelection, StageKind};

/// One enabled stage with its resolved directories.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChainLink {
    pub kind: StageKind,
    pub model: String,
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl ChainLink {
    pub fn label(&self) -> &'static str {
        self.kind.label()
    }
}

/// Ordered enabled stages for one run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StageChain {
    links: Vec<ChainLink>,
}

impl StageChain {
    pub fn links(&self) -> &[ChainLink] {
        &self.links
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChainLink> {
        self.links.iter()
    }

    /// Directory the last enabled stage writes to, or `input_dir` when empty.
    pub fn final_dir<'a>(&'a self, input_dir: &'a Path) -> &'a Path {
        self.links
            .last()
            .map(|link| link.output_dir.as_path())
            .unwrap_or(input_dir)
    }
}

impl<'a> IntoIterator for &'a StageChain {
    type Item = &'a ChainLink;
    type IntoIter = std::slice::Iter<'a, ChainLink>;

    fn into_iter(self) -> Self::IntoIter {
        self.links.iter()
    }
}

/// Output directory of a stage under the work root.
pub fn stage_output_dir(work_root: &Path, kind: StageKind) -> PathBuf {
    work_root.join(kind.output_dir_name())
}

/// Build the chain for `selection`, threading directories from `input_dir`.
pub fn build_chain(input_dir: &Path, work_root: &Path, selection: &ModelSelection) -> StageChain {
    let (links, _) = StageKind::ORDER.iter().fold(
        (Vec::with_capacity(StageKind::ORDER.len()), input_dir.to_path_buf()),
        |(mut links, current), kind| match selection.get(*kind) {
            Some(model) => {
                let output_dir = stage_output_dir(work_root, *kind);
                links.push(ChainLink {
                    kind: *kind,
                    model: model.to_string(),
                    input_dir: current,
                    output_dir: output_dir.clone(),
                });
                (links, output_dir)
            }
            None => (links, current),
        },
    );

    StageChain { links }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn selection_from_mask(mask: u8) -> ModelSelection {
        let mut selection = ModelSelection::none();
        for (bit, kind) in StageKind::ORDER.iter().enumerate() {
            if mask & (1 << bit) != 0 {
                selection.set(*kind, Some(format!("{}.ckpt", kind)));
            }
        }
        selection
    }

    #[test]
    fn empty_selection_gives_empty_chain() {
        let chain = build_chain(Path::new("input"), Path::new("."), &ModelSelection::none());
        assert!(chain.is_empty());
        assert_eq!(chain.final_dir(Path::new("input")), Path::new("input"));
    }

    #[test]
    fn every_subset_threads_directories_in_order() {
        let input = Path::new("input");
        let root = Path::new("work");

        for mask in 0u8..16 {
            let chain = build_chain(input, root, &selection_from_mask(mask));
            assert_eq!(chain.len(), mask.count_ones() as usize, "mask {mask:04b}");

            let mut expected_input = input.to_path_buf();
            let mut last_kind = None;
            for link in &chain {
                assert_eq!(link.input_dir, expected_input, "mask {mask:04b}");
                assert_eq!(link.output_dir, root.join(link.kind.output_dir_name()));
                assert!(last_kind < Some(link.kind));
                last_kind = Some(link.kind);
                expected_input = link.output_dir.clone();
            }
        }
    }

    #[test]
    fn skipped_stage_does_not_advance_directory() {
        let selection = ModelSelection::none()
            .with(StageKind::Vocal, "v.ckpt")
            .with(StageKind::Other, "o.ckpt");
        let chain = build_chain(Path::new("input"), Path::new("."), &selection);

        let links = chain.links();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].input_dir, Path::new("input"));
        assert_eq!(links[1].kind, StageKind::Other);
        assert_eq!(links[1].input_dir, Path::new("./separation_results"));
        assert_eq!(
            chain.final_dir(Path::new("input")),
            Path::new("./other_results")
        );
    }
}
