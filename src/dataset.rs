use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis, CowArray, Ix1, Ix2, s};
use ndarray_rand::rand::{Rng, seq::SliceRandom};

use crate::error::{Error, Result};

/// The labels of a dataset: plain digits (validation and test sets) or one-hot rows (training
/// set).
#[derive(Debug, Clone, PartialEq)]
pub enum Labels {
    Digits(Array1<usize>),
    OneHot(Array2<f64>),
}

impl Labels {
    pub fn len(&self) -> usize {
        self.view().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn view(&self) -> LabelsView<'_> {
        match self {
            Labels::Digits(digits) => LabelsView::Digits(digits.view()),
            Labels::OneHot(one_hot) => LabelsView::OneHot(one_hot.view()),
        }
    }

    fn select(&self, indices: &[usize]) -> Labels {
        match self {
            Labels::Digits(digits) => Labels::Digits(digits.select(Axis(0), indices)),
            Labels::OneHot(one_hot) => Labels::OneHot(one_hot.select(Axis(0), indices)),
        }
    }
}

/// A borrowed slice of [`Labels`].
#[derive(Debug, Clone)]
pub enum LabelsView<'a> {
    Digits(ArrayView1<'a, usize>),
    OneHot(ArrayView2<'a, f64>),
}

impl<'a> LabelsView<'a> {
    pub fn len(&self) -> usize {
        match self {
            LabelsView::Digits(digits) => digits.len(),
            LabelsView::OneHot(one_hot) => one_hot.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn slice(&self, start: usize, end: usize) -> LabelsView<'a> {
        match self {
            LabelsView::Digits(digits) => LabelsView::Digits(digits.slice_move(s![start..end])),
            LabelsView::OneHot(one_hot) => {
                LabelsView::OneHot(one_hot.slice_move(s![start..end, ..]))
            }
        }
    }

    /// One-hot rows of width `classes` for these labels, converting digits if needed. Digits
    /// outside `0..classes` and one-hot rows of another width are rejected.
    pub fn to_one_hot(&self, classes: usize) -> Result<CowArray<'a, f64, Ix2>> {
        match self {
            LabelsView::Digits(digits) => Ok(CowArray::from(vectorize_digits(digits, classes)?)),
            LabelsView::OneHot(one_hot) if one_hot.ncols() != classes => {
                Err(Error::ShapeMismatch {
                    context: "one-hot label width",
                    expected: classes,
                    actual: one_hot.ncols(),
                })
            }
            LabelsView::OneHot(one_hot) => Ok(CowArray::from(*one_hot)),
        }
    }

    /// Digit labels, decoding one-hot rows by their arg-max if needed.
    pub fn to_digits(&self) -> CowArray<'a, usize, Ix1> {
        match self {
            LabelsView::Digits(digits) => CowArray::from(*digits),
            LabelsView::OneHot(one_hot) => CowArray::from(argmax_rows(one_hot)),
        }
    }
}

/// A feature matrix (one example per row) with its matching labels.
///
/// A dataset is never modified once built. Shuffling and batching produce new arrays or views.
#[derive(Debug, Clone, PartialEq)]
pub struct Dataset {
    features: Array2<f64>,
    labels: Labels,
}

impl Dataset {
    pub fn new(features: Array2<f64>, labels: Labels) -> Result<Dataset> {
        if features.nrows() != labels.len() {
            return Err(Error::ShapeMismatch {
                context: "label count",
                expected: features.nrows(),
                actual: labels.len(),
            });
        }
        Ok(Dataset { features, labels })
    }

    pub fn len(&self) -> usize {
        self.features.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn features(&self) -> &Array2<f64> {
        &self.features
    }

    pub fn labels(&self) -> &Labels {
        &self.labels
    }

    /// Returns a copy with rows reordered by one random permutation, applied to features and
    /// labels alike so every example keeps its own label.
    pub fn shuffled<R: Rng + ?Sized>(&self, rng: &mut R) -> Dataset {
        let mut permutation = (0..self.len()).collect::<Vec<_>>();
        permutation.shuffle(rng);
        Dataset {
            features: self.features.select(Axis(0), &permutation),
            labels: self.labels.select(&permutation),
        }
    }

    /// Splits the dataset into consecutive batches of exactly `size` rows. A dataset whose length
    /// is not a multiple of `size` is rejected rather than silently truncated.
    pub fn batches(
        &self,
        size: usize,
    ) -> Result<impl Iterator<Item = (ArrayView2<'_, f64>, LabelsView<'_>)>> {
        check_divisible(self.len(), size)?;

        let features = self.features.view();
        let labels = self.labels.view();
        Ok((0..self.len()).step_by(size).map(move |start| {
            let end = start + size;
            (
                features.slice_move(s![start..end, ..]),
                labels.slice(start, end),
            )
        }))
    }
}

pub(crate) fn check_divisible(len: usize, size: usize) -> Result<()> {
    if size == 0 || len % size != 0 {
        return Err(Error::IndivisibleBatch { len, size });
    }
    Ok(())
}

// Turns digits into one-hot rows of width `classes`, with a 1.0 in the column of the digit. A
// digit with no column of its own would come out as an all-zero row that every cost happily
// scores, so it's an error instead.
pub fn vectorize_digits(digits: &ArrayView1<usize>, classes: usize) -> Result<Array2<f64>> {
    if let Some(&digit) = digits.iter().find(|&&digit| digit >= classes) {
        return Err(Error::InvalidData(format!(
            "label {digit} is out of range for {classes} classes"
        )));
    }
    Ok(Array2::from_shape_fn((digits.len(), classes), |(row, column)| {
        if digits[row] == column { 1.0 } else { 0.0 }
    }))
}

/// The column index of the largest value in each row.
pub fn argmax_rows(matrix: &ArrayView2<f64>) -> Array1<usize> {
    matrix
        .rows()
        .into_iter()
        .map(|row| {
            row.iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.total_cmp(b))
                .map(|(index, _)| index)
                .unwrap_or(0)
        })
        .collect()
}

/// The share of `total` examples that were not classified correctly.
pub fn error_fraction(correct: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    1.0 - correct as f64 / total as f64
}
