use crate::model::Entry;

/// The only mutation points the coordinator drives on the front end.
///
/// Implementations own rendering. Every call comes from the coordinator's
/// thread, after the staleness gate (downloads excepted) has admitted it.
pub trait UiSurface {
    fn add_entry(&mut self, entry: &Entry);
    fn clear(&mut self);
    /// The latest listing came back empty, or more pages cannot be requested.
    fn no_new_data(&mut self);
    fn something_wrong(&mut self, message: &str);
    fn update_progress(&mut self, entry: &Entry, value: f32);
    /// An entry gained a poster, a subtitle or a downloaded file.
    fn entry_updated(&mut self, entry: &Entry);
}

