//! Validated position and orientation of a single box, without the pipeline.

use rgbd_detector::{
    estimate_pose, CameraIntrinsics, ColorValidator, DepthFrame, Frame, Rect, Result,
    SensorOffset, TestPattern,
};

fn main() -> Result<()> {
    let (width, height) = (640, 480);
    let intrinsics = CameraIntrinsics::default();

    // blue wall leaning away to the right
    let color = Frame::test_pattern(width, height, TestPattern::Solid([200, 60, 20]));
    let depth: Vec<f32> = (0..width * height)
        .map(|i| 1.0 + 0.002 * (i % width) as f32)
        .collect();
    let depth = DepthFrame::from_meters(width, height, depth)?;

    let roi = Rect::new(280, 200, 360, 280);
    let validator = ColorValidator::new(intrinsics, SensorOffset::default());
    let validated = validator.validate(1, &roi, &color, &depth);
    println!(
        "validated depth: {:.3} m from {} samples (invalid: {})",
        validated.depth, validated.samples, validated.invalid
    );

    let pose = estimate_pose(&roi, &depth, &intrinsics, validated.position);
    if pose.valid {
        let p = pose.position;
        let (roll, pitch, yaw) = pose.orientation.euler_angles();
        println!("position: ({:.4}, {:.4}, {:.4}) m", p.x, p.y, p.z);
        println!(
            "orientation (rpy, deg): ({:.1}, {:.1}, {:.1})",
            roll.to_degrees(),
            pitch.to_degrees(),
            yaw.to_degrees()
        );
    } else {
        println!("no valid pose for {roi}");
    }
    Ok(())
}
