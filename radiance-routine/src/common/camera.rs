use glam::{Mat3, Mat4, Vec3};

/// First person camera in a left handed, y up world.
#[derive(Debug, Clone, PartialEq)]
pub struct Camera {
    position: Vec3,
    right: Vec3,
    up: Vec3,
    look: Vec3,

    fov_y: f32,
    aspect: f32,
    near_z: f32,
    far_z: f32,

    view: Mat4,
    proj: Mat4,
    view_dirty: bool,
}

impl Default for Camera {
    fn default() -> Self {
        let mut camera = Self {
            position: Vec3::ZERO,
            right: Vec3::X,
            up: Vec3::Y,
            look: Vec3::Z,
            fov_y: 0.0,
            aspect: 0.0,
            near_z: 0.0,
            far_z: 0.0,
            view: Mat4::IDENTITY,
            proj: Mat4::IDENTITY,
            view_dirty: true,
        };
        camera.set_lens(0.25 * std::f32::consts::PI, 1.0, 1.0, 1000.0);
        camera
    }
}

impl Camera {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_lens(&mut self, fov_y: f32, aspect: f32, near_z: f32, far_z: f32) {
        self.fov_y = fov_y;
        self.aspect = aspect;
        self.near_z = near_z;
        self.far_z = far_z;
        self.proj = Mat4::perspective_lh(fov_y, aspect, near_z, far_z);
    }

    pub fn set_position(&mut self, position: Vec3) {
        self.position = position;
        self.view_dirty = true;
    }

    /// Moves along the look direction.
    pub fn walk(&mut self, distance: f32) {
        self.position += self.look * distance;
        self.view_dirty = true;
    }

    /// Moves along the right direction.
    pub fn strafe(&mut self, distance: f32) {
        self.position += self.right * distance;
        self.view_dirty = true;
    }

    /// Rotates up and look around the right vector.
    pub fn pitch(&mut self, angle: f32) {
        let rotation = Mat3::from_axis_angle(self.right, angle);
        self.up = rotation * self.up;
        self.look = rotation * self.look;
        self.view_dirty = true;
    }

    /// Rotates every basis vector around the world y axis.
    pub fn rotate_y(&mut self, angle: f32) {
        let rotation = Mat3::from_rotation_y(angle);
        self.right = rotation * self.right;
        self.up = rotation * self.up;
        self.look = rotation * self.look;
        self.view_dirty = true;
    }

    /// Re-orthonormalizes the basis and rebuilds the view matrix if anything moved.
    pub fn update_view_matrix(&mut self) {
        if !self.view_dirty {
            return;
        }

        self.look = self.look.normalize();
        self.up = self.look.cross(self.right).normalize();
        self.right = self.up.cross(self.look);

        self.view = Mat4::look_to_lh(self.position, self.look, self.up);
        self.view_dirty = false;
    }

    pub fn view(&self) -> Mat4 {
        self.view
    }

    pub fn proj(&self) -> Mat4 {
        self.proj
    }

    pub fn position(&self) -> Vec3 {
        self.position
    }

    pub fn right(&self) -> Vec3 {
        self.right
    }

    pub fn up(&self) -> Vec3 {
        self.up
    }

    pub fn look(&self) -> Vec3 {
        self.look
    }

    pub fn fov_y(&self) -> f32 {
        self.fov_y
    }

    pub fn aspect(&self) -> f32 {
        self.aspect
    }

    pub fn near_z(&self) -> f32 {
        self.near_z
    }

    pub fn far_z(&self) -> f32 {
        self.far_z
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec4;

    use super::*;

    fn assert_close(a: Vec3, b: Vec3) {
        assert!((a - b).length() < 1e-4, "{a} != {b}");
    }

    #[test]
    fn walk_and_strafe_follow_the_basis() {
        let mut camera = Camera::new();
        camera.walk(2.0);
        camera.strafe(-1.0);
        assert_close(camera.position(), Vec3::new(-1.0, 0.0, 2.0));
    }

    #[test]
    fn rotate_y_turns_look_towards_x() {
        let mut camera = Camera::new();
        camera.rotate_y(std::f32::consts::FRAC_PI_2);
        camera.update_view_matrix();
        assert_close(camera.look(), Vec3::X);
        assert_close(camera.right(), -Vec3::Z);
    }

    #[test]
    fn basis_stays_orthonormal() {
        let mut camera = Camera::new();
        for i in 0..100 {
            camera.pitch(0.013 * i as f32);
            camera.rotate_y(-0.021 * i as f32);
            camera.update_view_matrix();
        }
        for v in [camera.right(), camera.up(), camera.look()] {
            assert!((v.length() - 1.0).abs() < 1e-4);
        }
        assert!(camera.right().dot(camera.up()).abs() < 1e-4);
        assert!(camera.up().dot(camera.look()).abs() < 1e-4);
        assert!(camera.look().dot(camera.right()).abs() < 1e-4);
    }

    #[test]
    fn view_matrix_moves_eye_to_origin() {
        let mut camera = Camera::new();
        camera.set_position(Vec3::new(-2.29, 5.11, 1.15));
        camera.pitch(0.3);
        camera.update_view_matrix();

        let eye = camera.view() * camera.position().extend(1.0);
        assert!(eye.truncate().length() < 1e-4);

        let ahead = camera.view() * (camera.position() + camera.look() * 5.0).extend(1.0);
        assert!((ahead - Vec4::new(0.0, 0.0, 5.0, 1.0)).length() < 1e-4);
    }

    #[test]
    fn projection_maps_near_and_far_to_unit_depth() {
        let camera = Camera::new();
        let near = camera.proj() * Vec4::new(0.0, 0.0, 1.0, 1.0);
        let far = camera.proj() * Vec4::new(0.0, 0.0, 1000.0, 1.0);
        assert!((near.z / near.w).abs() < 1e-5);
        assert!((far.z / far.w - 1.0).abs() < 1e-5);
    }
}
