use std::path::Path;

use crate::config::ExtensionRules;
use crate::core::models::{DiscoveredFile, PriorityTier, TierKind};

#[derive(Debug, Clone, Copy)]
pub struct ClassifyOptions {
    /// Order by the priority list; otherwise everything lands in one tier.
    pub enable_priority: bool,
    /// Emit a trailing tier for files whose extension is not prioritized.
    pub include_non_priority: bool,
}

/// Lower-cased extension of a path, without the dot.
pub fn file_extension(path: &Path) -> Option<String> {
    path.extension()
        .map(|ext| ext.to_string_lossy().to_lowercase())
}

/// Assign discovered files to ordered tiers.
///
/// Every configured priority tier is emitted, even when empty, so callers can
/// report "nothing to do" for it. Disabled extensions are dropped before any
/// ranking happens. Within a tier, files keep their discovery order.
pub fn classify(
    files: Vec<DiscoveredFile>,
    rules: &ExtensionRules,
    options: ClassifyOptions,
) -> Vec<PriorityTier> {
    let mut tiers: Vec<PriorityTier> = if options.enable_priority {
        let mut tiers: Vec<PriorityTier> = rules
            .priority()
            .iter()
            .enumerate()
            .map(|(rank, ext)| PriorityTier {
                rank,
                kind: TierKind::Priority(ext.clone()),
                files: Vec::new(),
            })
            .collect();

        if options.include_non_priority {
            tiers.push(PriorityTier {
                rank: tiers.len(),
                kind: TierKind::NonPriority,
                files: Vec::new(),
            });
        }
        tiers
    } else {
        vec![PriorityTier {
            rank: 0,
            kind: TierKind::AllFiles,
            files: Vec::new(),
        }]
    };

    for file in files {
        let ext = file_extension(&file.path);

        if ext.as_deref().is_some_and(|e| rules.is_disabled(e)) {
            continue;
        }

        if !options.enable_priority {
            tiers[0].files.push(file);
            continue;
        }

        match ext.as_deref().and_then(|e| rules.rank(e)) {
            Some(rank) => tiers[rank].files.push(file),
            None if options.include_non_priority => {
                if let Some(rest) = tiers.last_mut() {
                    rest.files.push(file);
                }
            }
            None => {}
        }
    }

    tiers
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn file(name: &str) -> DiscoveredFile {
        DiscoveredFile {
            path: PathBuf::from("/media/card").join(name),
            size: 1,
        }
    }

    fn names(tier: &PriorityTier) -> Vec<String> {
        tier.files
            .iter()
            .map(|f| f.path.file_name().unwrap().to_string_lossy().into_owned())
            .collect()
    }

    const PRIORITIZED: ClassifyOptions = ClassifyOptions {
        enable_priority: true,
        include_non_priority: true,
    };

    #[test]
    fn files_are_ranked_by_priority_list() {
        let rules = ExtensionRules::new(&[".jpg", ".mp4"], &[] as &[&str]).unwrap();
        let tiers = classify(
            vec![file("a.mp4"), file("b.jpg"), file("c.mp4"), file("notes.txt")],
            &rules,
            PRIORITIZED,
        );

        assert_eq!(tiers.len(), 3);
        assert_eq!(names(&tiers[0]), vec!["b.jpg"]);
        assert_eq!(names(&tiers[1]), vec!["a.mp4", "c.mp4"]);
        assert_eq!(tiers[2].kind, TierKind::NonPriority);
        assert_eq!(names(&tiers[2]), vec!["notes.txt"]);
    }

    #[test]
    fn matching_is_case_insensitive() {
        let rules = ExtensionRules::new(&["JPG"], &[] as &[&str]).unwrap();
        let tiers = classify(vec![file("IMG_0001.JPG"), file("img.jpg")], &rules, PRIORITIZED);
        assert_eq!(tiers[0].files.len(), 2);
    }

    #[test]
    fn disabled_extensions_never_appear() {
        let rules = ExtensionRules::new(&[".mov", ".jpg"], &[".MOV"]).unwrap();
        let tiers = classify(vec![file("clip.mov"), file("a.jpg"), file("b.MOV")], &rules, PRIORITIZED);

        let all: Vec<String> = tiers.iter().flat_map(names).collect();
        assert_eq!(all, vec!["a.jpg"]);
    }

    #[test]
    fn non_priority_files_dropped_when_only_priority_requested() {
        let rules = ExtensionRules::new(&[".jpg"], &[] as &[&str]).unwrap();
        let tiers = classify(
            vec![file("a.jpg"), file("b.png"), file("README")],
            &rules,
            ClassifyOptions {
                enable_priority: true,
                include_non_priority: false,
            },
        );

        assert_eq!(tiers.len(), 1);
        assert_eq!(names(&tiers[0]), vec!["a.jpg"]);
    }

    #[test]
    fn empty_priority_tiers_are_still_emitted() {
        let rules = ExtensionRules::new(&[".jpg", ".cr2"], &[] as &[&str]).unwrap();
        let tiers = classify(vec![file("a.jpg")], &rules, PRIORITIZED);

        assert_eq!(tiers.len(), 3);
        assert!(tiers[1].files.is_empty());
        assert_eq!(tiers[1].rank, 1);
    }

    #[test]
    fn priority_disabled_uses_single_tier() {
        let rules = ExtensionRules::new(&[".jpg"], &[".tmp"]).unwrap();
        let tiers = classify(
            vec![file("b.png"), file("a.jpg"), file("x.tmp")],
            &rules,
            ClassifyOptions {
                enable_priority: false,
                include_non_priority: false,
            },
        );

        assert_eq!(tiers.len(), 1);
        assert_eq!(tiers[0].kind, TierKind::AllFiles);
        assert_eq!(names(&tiers[0]), vec!["b.png", "a.jpg"]);
    }
}
