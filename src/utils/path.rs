/// Normalise a request path or service key into a lookup key.
///
/// Repeated slashes collapse, `.` segments vanish and `..` pops the previous
/// segment (never climbing above the root). The result carries no leading or
/// trailing slash, so `/csgo/`, `csgo` and `//a/../csgo` all map to `csgo`
/// and the root maps to the empty string.
pub fn clean_path(path: &str) -> String {
    let mut segments: Vec<&str> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            other => segments.push(other),
        }
    }
    segments.join("/")
}
