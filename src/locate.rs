//! Finds the rectangular sub-region most likely to contain the plate.
//!
//! Two interchangeable strategies: contour geometry over an edge map, and
//! OCR-line geometry over full-frame text candidates. Both return `None`
//! instead of failing when nothing qualifies.

use image::GrayImage;
use imageproc::contours::find_contours;
use imageproc::geometry::{approximate_polygon_dp, arc_length};
use imageproc::point::Point;
use log::debug;

use crate::validate;
use crate::{Region, TextCandidate};

/// Locator choice for a pipeline run.
#[derive(Debug, Clone, Copy)]
pub enum LocateStrategy {
    /// Quadrilateral contours in an edge map, filtered by plate geometry.
    Contour(ContourParams),
    /// Bounding box of the first full-frame OCR line that starts with a
    /// province prefix.
    OcrLines,
}

#[derive(Debug, Clone, Copy)]
pub struct ContourParams {
    /// Polygon approximation tolerance as a fraction of the contour perimeter.
    pub epsilon_factor: f64,
    pub min_aspect: f32,
    pub max_aspect: f32,
    pub min_area: u32,
    pub max_area: u32,
}

impl Default for ContourParams {
    fn default() -> Self {
        // plates are wide and short; the area band rejects noise specks and
        // windshield-sized rectangles
        Self {
            epsilon_factor: 0.02,
            min_aspect: 2.0,
            max_aspect: 6.0,
            min_area: 1000,
            max_area: 30000,
        }
    }
}

/// A located plate candidate: the axis-aligned region plus the quadrilateral
/// it was derived from, when the strategy produces one.
#[derive(Debug, Clone)]
pub struct Located {
    pub region: Region,
    pub polygon: Option<Vec<Point<i32>>>,
}

/// Walk the contours of an edge map and return the first quadrilateral whose
/// bounding rectangle passes the aspect-ratio and area filters.
///
/// The first hit in contour traversal order wins; there is no global ranking
/// of candidates, so a qualifying non-plate rectangle earlier in the traversal
/// shadows the real plate. Known precision/recall limitation.
pub fn locate_by_contours(edges: &GrayImage, params: &ContourParams) -> Option<Located> {
    let contours = find_contours::<i32>(edges);
    debug!("{} contours in edge map", contours.len());

    for contour in &contours {
        if contour.points.len() < 4 {
            continue;
        }
        let epsilon = params.epsilon_factor * arc_length(&contour.points, true);
        let polygon = approximate_polygon_dp(&contour.points, epsilon, true);
        // the plate is modeled as a flat rectangle
        if polygon.len() != 4 {
            continue;
        }
        let region = match bounding_region(&polygon, edges.dimensions()) {
            Some(region) => region,
            None => continue,
        };
        let aspect = region.aspect_ratio();
        let area = region.area();
        if aspect > params.min_aspect
            && aspect < params.max_aspect
            && area > params.min_area
            && area < params.max_area
        {
            debug!(
                "plate candidate at {:?}, aspect {:.2}, area {}",
                region, aspect, area
            );
            return Some(Located { region, polygon: Some(polygon) });
        }
    }
    None
}

/// Bounding box of the first candidate whose cleaned text begins with one of
/// the 31 province-prefix characters.
pub fn locate_by_ocr_lines(candidates: &[TextCandidate]) -> Option<Region> {
    candidates
        .iter()
        .find(|candidate| validate::has_province_prefix(&validate::clean_text(&candidate.text)))
        .map(|candidate| candidate.bounding_box)
}

fn bounding_region(points: &[Point<i32>], bounds: (u32, u32)) -> Option<Region> {
    let min_x = points.iter().map(|p| p.x).min()?;
    let min_y = points.iter().map(|p| p.y).min()?;
    let max_x = points.iter().map(|p| p.x).max()?;
    let max_y = points.iter().map(|p| p.y).max()?;
    Region::clamped(
        min_x as i64,
        min_y as i64,
        max_x as i64 + 1,
        max_y as i64 + 1,
        bounds,
    )
}

#[cfg(test)]
mod test {

    use image::Luma;
    use imageproc::drawing::draw_hollow_rect_mut;
    use imageproc::rect::Rect;

    use super::*;

    fn edge_map_with_rect(width: u32, height: u32, rect: Rect) -> GrayImage {
        let mut edges = GrayImage::new(width, height);
        draw_hollow_rect_mut(&mut edges, rect, Luma([255]));
        edges
    }

    #[test]
    fn plate_shaped_rectangle_is_located() {
        // aspect 3.5, area 5600
        let edges = edge_map_with_rect(256, 128, Rect::at(30, 40).of_size(140, 40));
        let located = locate_by_contours(&edges, &ContourParams::default())
            .expect("rectangle should qualify");
        let region = located.region;
        assert!((region.x as i32 - 30).abs() <= 2, "x = {}", region.x);
        assert!((region.y as i32 - 40).abs() <= 2, "y = {}", region.y);
        assert!((region.width as i32 - 140).abs() <= 4, "width = {}", region.width);
        assert!((region.height as i32 - 40).abs() <= 4, "height = {}", region.height);
        assert!(located.polygon.is_some());
    }

    #[test]
    fn empty_edge_map_yields_none() {
        let edges = GrayImage::new(128, 128);
        assert!(locate_by_contours(&edges, &ContourParams::default()).is_none());
    }

    #[test]
    fn square_aspect_is_rejected() {
        let edges = edge_map_with_rect(128, 128, Rect::at(20, 20).of_size(50, 50));
        assert!(locate_by_contours(&edges, &ContourParams::default()).is_none());
    }

    #[test]
    fn oversized_rectangle_is_rejected() {
        // aspect 4.4 is fine but 400*90 = 36000 exceeds the area band
        let edges = edge_map_with_rect(512, 256, Rect::at(40, 40).of_size(400, 90));
        assert!(locate_by_contours(&edges, &ContourParams::default()).is_none());
    }

    #[test]
    fn undersized_rectangle_is_rejected() {
        // aspect 3.0 but 30*10 = 300 is below the area band
        let edges = edge_map_with_rect(128, 64, Rect::at(10, 10).of_size(30, 10));
        assert!(locate_by_contours(&edges, &ContourParams::default()).is_none());
    }

    fn candidate(text: &str, x: u32) -> TextCandidate {
        TextCandidate {
            text: text.to_string(),
            confidence: 0.5,
            bounding_box: Region { x, y: 10, width: 90, height: 30 },
        }
    }

    #[test]
    fn first_province_prefixed_line_wins() {
        let candidates = vec![
            candidate("入口处", 0),
            candidate("京A12345", 40),
            candidate("沪B67890", 80),
        ];
        let region = locate_by_ocr_lines(&candidates).expect("prefixed line present");
        assert_eq!(region.x, 40);
    }

    #[test]
    fn no_prefixed_line_yields_none() {
        let candidates = vec![candidate("围观者", 0), candidate("车辆", 40)];
        assert!(locate_by_ocr_lines(&candidates).is_none());
    }
}
