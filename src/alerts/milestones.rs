/// Fixed early milestones; from 25 on every multiple of 25 counts too.
const EARLY: [u64; 4] = [5, 10, 20, 50];
const EVERY: u64 = 25;

/// Whether reaching `count` scrolled reels is a milestone.
///
/// The lifetime counter only ever grows by one, so checking the exact value
/// fires once per crossing.
pub fn is_milestone(count: u64) -> bool {
    EARLY.contains(&count) || (count >= EVERY && count % EVERY == 0)
}
