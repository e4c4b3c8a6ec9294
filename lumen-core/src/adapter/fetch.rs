use super::entry::ImageVariant;

/// One step of the fetch priority scan: an offset from the center item and
/// the artifact to load for it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageFetch {
    pub offset: isize,
    pub variant: ImageVariant,
}

impl ImageFetch {
    pub const fn new(offset: isize, variant: ImageVariant) -> Self {
        Self { offset, variant }
    }
}

/// Center preview first, then neighbor previews outward (+i before -i),
/// then full images for the center and its neighbors within
/// `full_image_radius`.
pub fn fetch_sequence(radius: usize, full_image_radius: usize) -> Vec<ImageFetch> {
    let radius = radius as isize;
    let full_radius = full_image_radius as isize;

    let mut seq = Vec::with_capacity((2 * radius as usize + 1) * 2);
    seq.push(ImageFetch::new(0, ImageVariant::Preview));
    for i in 1..=radius {
        seq.push(ImageFetch::new(i, ImageVariant::Preview));
        seq.push(ImageFetch::new(-i, ImageVariant::Preview));
    }

    seq.push(ImageFetch::new(0, ImageVariant::Full));
    for i in 1..=full_radius.min(radius) {
        seq.push(ImageFetch::new(i, ImageVariant::Full));
        seq.push(ImageFetch::new(-i, ImageVariant::Full));
    }
    seq
}

#[cfg(test)]
mod tests {
    use super::*;
    use ImageVariant::{Full, Preview};

    #[test]
    fn radius_one_sequence() {
        let seq: Vec<_> = fetch_sequence(1, 1)
            .into_iter()
            .map(|f| (f.offset, f.variant))
            .collect();
        assert_eq!(
            seq,
            vec![(0, Preview), (1, Preview), (-1, Preview), (0, Full), (1, Full), (-1, Full)]
        );
    }

    #[test]
    fn full_images_limited_by_their_radius() {
        let seq = fetch_sequence(3, 0);
        assert_eq!(seq.iter().filter(|f| f.variant == Full).count(), 1);
        assert_eq!(seq.iter().filter(|f| f.variant == Preview).count(), 7);
    }
}
