//! Cosmetic progress derived from file state
//!
//! Display only; nothing in the pipeline branches on these numbers.

use intake_common::events::FileState;

/// Progress percentage for one state
pub fn progress_for(state: FileState) -> u8 {
    match state {
        FileState::Uploading => 20,
        FileState::DuplicateCheck | FileState::DuplicateDetected => 40,
        FileState::Uploaded => 60,
        FileState::Parsing => 80,
        FileState::Parsed | FileState::ParseError | FileState::Error => 100,
        FileState::Removed => 0,
    }
}

/// Mean progress over the given states, ignoring `Removed`
///
/// Returns 0 when nothing is left to average.
pub fn aggregate_progress<I>(states: I) -> u8
where
    I: IntoIterator<Item = FileState>,
{
    let (sum, count) = states
        .into_iter()
        .filter(|s| *s != FileState::Removed)
        .fold((0u32, 0u32), |(sum, count), s| {
            (sum + u32::from(progress_for(s)), count + 1)
        });

    if count == 0 {
        0
    } else {
        (sum / count) as u8
    }
}
