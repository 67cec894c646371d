use std::io;

/// Read access to the domain's profile file space.
///
/// Descriptor loading and device `load` calls both go through this seam;
/// the platform's file manager implements it.
pub trait ProfileSource: Send + Sync {
    fn read_to_string(&self, path: &str) -> io::Result<String>;

    fn exists(&self, path: &str) -> bool {
        self.read_to_string(path).is_ok()
    }
}
