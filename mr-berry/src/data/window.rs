/// 灰度窗口, 由窗下限和窗上限确定, 用于将 MRI 强度映射为 8-bit 灰度值.
///
/// 该窗口是只读的. 若要修改窗口参数, 你应该创建新的实例.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct GrayWindow {
    lower: f32,
    upper: f32,
}

impl GrayWindow {
    /// 构建灰度窗.
    ///
    /// `lower` 和 `upper` 必须是有限值且 `lower <= upper`, 否则返回 `None`.
    /// 允许 `lower == upper`, 此时所有有限强度都映射为 0.
    pub fn new(lower: f32, upper: f32) -> Option<GrayWindow> {
        if lower.is_finite() && upper.is_finite() && lower <= upper {
            Some(Self { lower, upper })
        } else {
            None
        }
    }

    /// 以 `it` 中有限值的最小值和最大值构建窗口 (即 min-max 归一化).
    ///
    /// 如果 `it` 中不存在有限值, 则返回 `None`.
    pub fn from_min_max<I: IntoIterator<Item = f32>>(it: I) -> Option<GrayWindow> {
        let (lo, hi) = it
            .into_iter()
            .filter(|v| v.is_finite())
            .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), v| {
                (lo.min(v), hi.max(v))
            });
        Self::new(lo, hi)
    }

    /// 窗下限.
    #[inline]
    pub fn lower_bound(&self) -> f32 {
        self.lower
    }

    /// 窗上限.
    #[inline]
    pub fn upper_bound(&self) -> f32 {
        self.upper
    }

    /// 窗宽.
    #[inline]
    pub fn width(&self) -> f32 {
        self.upper - self.lower
    }

    /// 求在当前窗口设置下, 强度 `v` 对应的灰度图像素整数值 (0 <= value <= 255).
    ///
    /// 如果 `v` 无意义 (如 inf, NaN), 则返回 `None`.
    pub fn eval(&self, v: f32) -> Option<u8> {
        self.eval_f32(v).map(|g| g as u8)
    }

    /// 求在当前窗口设置下, 强度 `v` 对应的灰度图像素分布点 (0.0 <= value <= 255.0).
    ///
    /// 如果 `v` 无意义 (如 inf, NaN), 则返回 `None`.
    pub fn eval_f32(&self, v: f32) -> Option<f32> {
        if !v.is_finite() {
            return None;
        }
        if v <= self.lower || self.width() == 0.0 {
            Some(0.0)
        } else if v >= self.upper {
            Some(255.0)
        } else {
            // 255, not 256.
            Some((v - self.lower) / self.width() * 255.0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::GrayWindow;

    fn float_eq(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn test_gray_window_invalid_input() {
        assert!(GrayWindow::new(1.0, 0.0).is_none());
        assert!(GrayWindow::new(f32::NAN, 0.0).is_none());
        assert!(GrayWindow::from_min_max([f32::NAN, f32::INFINITY]).is_none());
        assert!(GrayWindow::from_min_max(std::iter::empty()).is_none());
    }

    #[test]
    fn test_gray_window_generic() {
        // [60, 100]
        let w = GrayWindow::from_min_max([80.0, 60.0, f32::NAN, 100.0]).unwrap();
        assert_eq!(w.lower_bound(), 60.0);
        assert_eq!(w.upper_bound(), 100.0);
        assert_eq!(w.eval(f32::NAN), None);
        assert_eq!(w.eval(f32::MIN), Some(0));
        assert_eq!(w.eval(f32::MAX), Some(255));

        assert_eq!(w.eval(60.0), Some(0));
        assert_eq!(w.eval(70.0).unwrap(), (255.0 * 0.25) as u8);
        assert!(float_eq(w.eval_f32(80.0).unwrap(), 255.0 * 0.5));
        assert_eq!(w.eval(99.999), Some(254));
        assert_eq!(w.eval(100.0), Some(255));
    }

    #[test]
    fn test_gray_window_constant() {
        let w = GrayWindow::from_min_max([5.0, 5.0]).unwrap();
        assert_eq!(w.eval(5.0), Some(0));
        assert_eq!(w.eval(6.0), Some(0));
    }
}
