use std::collections::VecDeque;

#[derive(Debug, Clone)]
pub(crate) struct RollingSma {
    window: usize,
    buf: VecDeque<f64>,
    sum: f64,
}

impl RollingSma {
    pub(crate) fn new(window: usize) -> Self {
        Self {
            window,
            buf: VecDeque::with_capacity(window),
            sum: 0.0,
        }
    }

    pub(crate) fn update(&mut self, value: f64) -> Option<f64> {
        if self.window == 0 {
            return None;
        }

        self.buf.push_back(value);
        self.sum += value;
        while self.buf.len() > self.window {
            if let Some(front) = self.buf.pop_front() {
                self.sum -= front;
            }
        }

        if self.buf.len() == self.window {
            Some(self.sum / self.window as f64)
        } else {
            None
        }
    }
}

/// Trailing mean and population standard deviation.
#[derive(Debug, Clone)]
pub(crate) struct RollingStd {
    window: usize,
    buf: VecDeque<f64>,
    sum: f64,
}

impl RollingStd {
    pub(crate) fn new(window: usize) -> Self {
        Self {
            window,
            buf: VecDeque::with_capacity(window),
            sum: 0.0,
        }
    }

    pub(crate) fn update(&mut self, value: f64) -> Option<(f64, f64)> {
        if self.window == 0 {
            return None;
        }

        self.buf.push_back(value);
        self.sum += value;
        while self.buf.len() > self.window {
            if let Some(front) = self.buf.pop_front() {
                self.sum -= front;
            }
        }

        if self.buf.len() < self.window {
            return None;
        }

        let n = self.window as f64;
        let mean = self.sum / n;
        // two-pass variance, stays at zero on flat windows
        let var = self.buf.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / n;
        Some((mean, var.max(0.0).sqrt()))
    }
}

/// Trailing window of close-to-close deltas.
#[derive(Debug, Clone)]
pub(crate) struct RollingDeltas {
    window: usize,
    prev: Option<f64>,
    deltas: VecDeque<f64>,
}

impl RollingDeltas {
    pub(crate) fn new(window: usize) -> Self {
        Self {
            window,
            prev: None,
            deltas: VecDeque::with_capacity(window),
        }
    }

    /// Average gain and average loss once `window` deltas are available.
    pub(crate) fn update(&mut self, close: f64) -> Option<(f64, f64)> {
        let prev = self.prev.replace(close)?;
        if self.window == 0 {
            return None;
        }

        self.deltas.push_back(close - prev);
        while self.deltas.len() > self.window {
            self.deltas.pop_front();
        }
        if self.deltas.len() < self.window {
            return None;
        }

        let (gains, losses) = self
            .deltas
            .iter()
            .fold((0.0, 0.0), |(g, l), d| if *d > 0.0 { (g + d, l) } else { (g, l - d) });
        let n = self.window as f64;
        Some((gains / n, losses / n))
    }
}
