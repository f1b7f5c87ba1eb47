//! Page batching: split a request's images into ordered, labelled batches.

/// A contiguous run of images with their 1-based page labels.
///
/// `total_pages` is the image count of the parent request and is echoed
/// into prompts so the model knows where in the report the batch sits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageBatch {
    pub images: Vec<String>,
    pub labels: Vec<usize>,
    pub total_pages: usize,
}

impl PageBatch {
    /// One batch holding every image of the request.
    pub fn whole(images: &[String]) -> Self {
        PageBatch {
            images: images.to_vec(),
            labels: (1..=images.len()).collect(),
            total_pages: images.len(),
        }
    }

    /// Split into consecutive batches of at most `batch_size` images.
    ///
    /// A `batch_size` of 0 is treated as 1.
    pub fn split(images: &[String], batch_size: usize) -> Vec<Self> {
        let size = batch_size.max(1);
        let total = images.len();
        images
            .chunks(size)
            .enumerate()
            .map(|(i, chunk)| {
                let start = i * size + 1;
                PageBatch {
                    images: chunk.to_vec(),
                    labels: (start..start + chunk.len()).collect(),
                    total_pages: total,
                }
            })
            .collect()
    }

    /// One single-image batch per image, each keeping its own label.
    pub fn single_pages(&self) -> Vec<Self> {
        self.images
            .iter()
            .zip(&self.labels)
            .map(|(img, &label)| PageBatch {
                images: vec![img.clone()],
                labels: vec![label],
                total_pages: self.total_pages,
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }
}
