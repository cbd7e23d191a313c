use crate::data_type::DataType;
use crate::error::Result;
use crate::window::{BufferLayout, IoOptions, Window};
use crate::RawDataset;

pub trait Raster {
    fn bands(&self) -> usize;
    fn width(&self) -> usize;
    fn height(&self) -> usize;
    fn sample(&mut self, band: usize, x: usize, y: usize) -> Result<Option<f64>>;
}

impl Raster for RawDataset {
    fn bands(&self) -> usize {
        self.n_bands()
    }

    fn width(&self) -> usize {
        RawDataset::width(self)
    }

    fn height(&self) -> usize {
        RawDataset::height(self)
    }

    fn sample(&mut self, band: usize, x: usize, y: usize) -> Result<Option<f64>> {
        if x >= RawDataset::width(self) || y >= RawDataset::height(self) {
            return Ok(None);
        }
        let Some(band) = self.band_mut(band) else {
            return Ok(None);
        };
        let mut value = [0u8; 8];
        band.read_window(
            Window::new(x, y, 1, 1),
            &mut value,
            BufferLayout::packed(1, 1, DataType::F64),
            &IoOptions::default(),
            None,
        )?;
        Ok(Some(f64::from_ne_bytes(value)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::band::{Access, BandLayout, RawBand};
    use crate::data_type::ByteOrder;
    use crate::file::MemoryFile;
    use std::sync::Arc;

    #[test]
    fn test_sample() {
        let data: Vec<u8> = (0..100).map(|v| v as u8).collect();
        let file = Arc::new(MemoryFile::with_data(data));
        let layout = BandLayout {
            img_offset: 0,
            pixel_stride: 1,
            line_stride: 10,
            data_type: DataType::U8,
            byte_order: ByteOrder::native(),
        };
        let band = RawBand::new(file, layout, 10, 10, Access::ReadOnly).unwrap();
        let mut dataset = RawDataset::new(vec![band]).unwrap();

        assert_eq!(dataset.bands(), 1);
        assert_eq!(dataset.sample(0, 3, 4).unwrap(), Some(43.0));
        assert_eq!(dataset.sample(0, 10, 0).unwrap(), None);
        assert_eq!(dataset.sample(1, 0, 0).unwrap(), None);
    }
}
