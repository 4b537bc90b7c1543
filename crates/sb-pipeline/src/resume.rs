//! Decides what to do with a storyboard found in progress at startup.

use sb_core::Storyboard;

/// Action to take for a loaded storyboard.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeDecision {
    /// Already terminal.
    None,
    /// Every scene is present but the in-progress flag is stale; finalize
    /// without generating anything.
    RepairStatusOnly,
    /// Continue dispatching from scene `cursor`.
    ResumeGeneration { cursor: usize },
}

/// Inspect `storyboard` and pick a [`ResumeDecision`].
///
/// A `total_scenes` of zero means no count was ever recorded, so the
/// storyboard is treated as complete.
pub fn should_resume(storyboard: &Storyboard) -> ResumeDecision {
    let status = &storyboard.status;
    if !status.in_progress {
        return ResumeDecision::None;
    }

    let cursor = storyboard.resume_cursor();
    if status.total_scenes == 0 || cursor >= status.total_scenes {
        ResumeDecision::RepairStatusOnly
    } else {
        ResumeDecision::ResumeGeneration { cursor }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use sb_core::{Clip, ClipId, SceneDescription, ScenePlan};

    fn storyboard(total: usize, clips: usize) -> Storyboard {
        let scenes = (0..total)
            .map(|i| SceneDescription {
                id: None,
                prompt: format!("scene {i}"),
                target_duration_seconds: 1.0,
            })
            .collect();
        let mut sb = Storyboard::new("t", "", "openai".into(), ScenePlan::new(scenes));
        for order in 0..clips {
            sb.clips.push(Clip {
                id: ClipId::new(),
                name: format!("Scene {}", order + 1),
                content: "<svg/>".into(),
                duration_seconds: 1.0,
                order,
                prompt: String::new(),
                dialogue_history: Vec::new(),
                created_at: Utc::now(),
                external_content_id: None,
                provider: "openai".into(),
            });
        }
        sb.status.completed_scenes = clips;
        sb
    }

    #[test]
    fn finished_storyboard_needs_nothing() {
        let mut sb = storyboard(3, 1);
        sb.status.in_progress = false;
        assert_eq!(should_resume(&sb), ResumeDecision::None);
    }

    #[test]
    fn complete_but_flagged_is_repaired() {
        assert_eq!(should_resume(&storyboard(3, 3)), ResumeDecision::RepairStatusOnly);
    }

    #[test]
    fn zero_total_is_repaired() {
        let mut sb = storyboard(0, 0);
        sb.status.total_scenes = 0;
        assert_eq!(should_resume(&sb), ResumeDecision::RepairStatusOnly);
    }

    #[test]
    fn partial_storyboard_resumes_at_clip_count() {
        assert_eq!(
            should_resume(&storyboard(5, 2)),
            ResumeDecision::ResumeGeneration { cursor: 2 }
        );
    }
}
