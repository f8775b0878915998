// KML placemark output
//
// One placemark per geotagged photo with the photo thumbnail embedded in the
// balloon, for eyeballing the computed positions (and the delta) in a map
// viewer. The document is small enough that it is assembled as text.

use std::fs;
use std::path::Path;

use tracing::{error, info};

use crate::errors::Result;
use crate::locate::Position;

/// Per-photo data for one placemark.
#[derive(Debug, Clone)]
pub struct Placemark {
    /// Label shown in the balloon (file name or photo page URL)
    pub name: String,
    /// URL or path of the image to embed
    pub image_src: String,
    /// Optional CSS applied to the embedded image
    pub image_style: Option<String>,
}

/// Write the KML file if an output path was configured.
///
/// With no georeferenced photos there is nothing to show and no file is
/// written (logged as an error, matching the run's other per-output logs).
pub fn process_kml(
    entries: &[(Position, Placemark)],
    output: Option<&Path>,
    thumbnail_size: u32,
) -> Result<()> {
    let Some(path) = output else {
        return Ok(());
    };
    info!("Writing KML...");
    if entries.is_empty() {
        error!("No KML output (no georeferenced photos)!");
        return Ok(());
    }
    write_kml(entries, path, thumbnail_size)?;
    info!("KML written to {}", path.display());
    Ok(())
}

/// Render and write the placemark document.
pub fn write_kml(entries: &[(Position, Placemark)], path: &Path, thumbnail_size: u32) -> Result<()> {
    fs::write(path, render_kml(entries, thumbnail_size))?;
    Ok(())
}

fn render_kml(entries: &[(Position, Placemark)], thumbnail_size: u32) -> String {
    let mut kml = String::new();
    kml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    kml.push_str("<kml xmlns=\"http://www.opengis.net/kml/2.2\">\n");
    kml.push_str("<Document>\n");
    kml.push_str("  <Style id=\"photo\">\n");
    kml.push_str("    <BalloonStyle><text>$[description]</text></BalloonStyle>\n");
    kml.push_str("  </Style>\n");

    for (position, placemark) in entries {
        let style = placemark
            .image_style
            .as_deref()
            .map(|css| format!(" style=\"{}\"", css))
            .unwrap_or_default();
        kml.push_str("  <Placemark>\n");
        kml.push_str(&format!(
            "    <description><![CDATA[\n{}</br></br>\n<img src=\"{}\" width=\"{}\"{} />\n]]></description>\n",
            cdata_safe(&placemark.name),
            cdata_safe(&placemark.image_src),
            thumbnail_size,
            style,
        ));
        kml.push_str("    <styleUrl>#photo</styleUrl>\n");
        // KML coordinate order is longitude,latitude.
        kml.push_str(&format!(
            "    <Point><coordinates>{},{}</coordinates></Point>\n",
            position.lon, position.lat
        ));
        kml.push_str("  </Placemark>\n");
    }

    kml.push_str("</Document>\n");
    kml.push_str("</kml>\n");
    kml
}

/// CDATA content must not contain the section terminator.
fn cdata_safe(s: &str) -> String {
    s.replace("]]>", "]]&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(lat: f64, lon: f64, name: &str) -> (Position, Placemark) {
        (
            Position::new(lat, lon),
            Placemark {
                name: name.to_string(),
                image_src: format!("file:///photos/{}", name),
                image_style: None,
            },
        )
    }

    #[test]
    fn test_render_coordinates_lon_lat_order() {
        let rendered = render_kml(&[entry(10.1, 20.1, "a.jpg")], 400);
        assert!(rendered.contains("<coordinates>20.1,10.1</coordinates>"));
    }

    #[test]
    fn test_render_one_placemark_per_entry() {
        let rendered = render_kml(&[entry(1.0, 2.0, "a.jpg"), entry(3.0, 4.0, "b.jpg")], 400);
        assert_eq!(rendered.matches("<Placemark>").count(), 2);
        assert!(rendered.contains("a.jpg"));
        assert!(rendered.contains("b.jpg"));
    }

    #[test]
    fn test_render_thumbnail_size_and_style() {
        let mut e = entry(1.0, 2.0, "a.jpg");
        e.1.image_style = Some("transform: rotate(90deg)".to_string());
        let rendered = render_kml(&[e], 250);
        assert!(rendered.contains("width=\"250\""));
        assert!(rendered.contains("style=\"transform: rotate(90deg)\""));
    }

    #[test]
    fn test_cdata_terminator_is_neutralized() {
        let mut e = entry(1.0, 2.0, "weird]]>name.jpg");
        e.1.image_src = "x".to_string();
        let rendered = render_kml(&[e], 400);
        assert!(!rendered.contains("weird]]>name"));
    }

    #[test]
    fn test_write_kml_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("photos.kml");
        write_kml(&[entry(10.0, 20.0, "a.jpg")], &path, 400).unwrap();
        let contents = fs::read_to_string(&path).unwrap();
        assert!(contents.starts_with("<?xml"));
        assert!(contents.contains("</kml>"));
    }
}
